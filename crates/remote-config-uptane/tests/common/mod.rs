#![allow(dead_code)]

pub mod tuf;
