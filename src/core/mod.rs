//! Core of the simulator: policy language, entities, catalog and evaluation

pub mod catalog;
pub mod entities;
pub mod error;
pub mod iam;
pub mod options;
pub mod sim;
