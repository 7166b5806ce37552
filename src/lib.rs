pub mod attack;
pub mod benchmark;
pub mod config;
pub mod controller;
pub mod error;
pub mod escape;
pub mod hardware;
pub mod maneuver;
pub mod opening;
pub mod rng;
pub mod runner;
pub mod search;
pub mod sensors;
pub mod sim;
pub mod stance;
pub mod state;
pub mod util;
