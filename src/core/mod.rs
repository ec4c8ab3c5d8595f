// Core modules: error model, artifact layout, decision logic, and default collaborators.
pub mod error;
pub mod installer;
pub mod layout;
pub mod official;
pub mod ops;
pub mod registry;
pub mod statement;
