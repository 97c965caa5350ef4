// Network transport for the worker protocol.

pub mod handler;
