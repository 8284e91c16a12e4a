pub mod extract;
pub mod prompts;
pub mod schema;
