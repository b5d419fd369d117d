#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod node;
mod stat;
mod time;

pub use self::{
    dirent::{DirEntry, DirEntryType, DirentWriter},
    error::Error,
    node::Node,
    stat::Stat,
    time::{Clock, Timespec},
};
