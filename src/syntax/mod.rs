//! Generated grammar adapters.
//!
//! The concrete parse trees the builder walks come from these two
//! pest-generated parsers. Each lives in its own module so each grammar gets
//! its own `Rule` enum. The grammars are the only place surface syntax is
//! defined; the rest of the crate consumes `Pairs` and never inspects raw
//! source except to slice verbatim node text.

/// The markup/template grammar.
pub mod template {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "syntax/template.pest"]
    pub struct TemplateGrammar;
}

/// The VellumScript expression/statement grammar.
pub mod script {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "syntax/script.pest"]
    pub struct ScriptGrammar;
}
