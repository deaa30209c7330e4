pub mod document;
pub mod relational_a;
pub mod relational_b;
