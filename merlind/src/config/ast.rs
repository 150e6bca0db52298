//! Raw parse tree for the block/key-value configuration grammar (spec §6).
//! Intentionally dumb: no semantic validation happens here, that's
//! [`super::model`]'s job. Mirrors the teacher's separation of
//! `config/parse.rs` (grammar) from `config/configs.rs` (typed config).

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub label: Option<String>,
    pub vars: Vec<Var>,
    pub nested: Vec<Block>,
}

impl Block {
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.iter().find(|v| v.key == key).map(|v| v.value.as_str())
    }

    pub fn nested_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Block> {
        self.nested.iter().filter(move |b| b.name == name)
    }

    pub fn nested_one(&self, name: &str) -> Option<&Block> {
        self.nested.iter().find(|b| b.name == name)
    }
}
