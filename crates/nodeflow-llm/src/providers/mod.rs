pub mod openai;

pub use openai::OpenAiAdapter;
