pub mod openai_compatible;
pub mod parse;
pub mod prompt;

pub use openai_compatible::OpenAiPlanner;
pub use parse::{parse_answer, split_response, ParseError, ParsedAnswer};
pub use prompt::system_prompt;
