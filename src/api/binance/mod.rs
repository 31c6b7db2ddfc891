pub mod interval;
pub mod rest;
pub mod ws;
