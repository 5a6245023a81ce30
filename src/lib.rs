// murmur: optimistic social feed client core
//
// This is the library root. Each module corresponds to one layer of the
// client: backend collaborators, the typed gateway over them, optimistic
// mutations, live feeds and the shared session.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod models;
pub mod mutation;
pub mod output;
pub mod session;
pub mod status;

mod sync;
