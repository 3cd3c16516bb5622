//! kbask gateway: the ask pipeline plus its HTTP and CLI surfaces.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
