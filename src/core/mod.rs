pub mod comparator;
pub mod document_loader;
pub mod errors;
pub mod extraction;
pub mod gemini_client;
pub mod models;
pub mod prompts;
pub mod ranking;
pub mod report;
pub mod secret_store;
pub mod session;
pub mod settings_store;
pub mod structured;

#[cfg(test)]
pub mod testing;
