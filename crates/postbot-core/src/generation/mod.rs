//! Text + image post generation: the backend port and the request pipeline.

pub mod pipeline;
pub mod port;
pub mod prompts;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;
