pub mod context;
pub mod entity;
pub mod guardrail;
pub mod schema;
