pub mod api;
pub mod candidate;
pub mod compose;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod existence;
pub mod parser;
pub mod pipeline;
pub mod redirects;
pub mod startup;
pub mod strip;
pub mod titles;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;
