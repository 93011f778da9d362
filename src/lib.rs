pub mod api;
pub mod auth;
pub mod blocks;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod likes;
pub mod messages;
pub mod model;
pub mod presence;
pub mod users;
pub mod ws;
