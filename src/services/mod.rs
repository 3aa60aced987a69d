pub mod leaderboard_service;
pub mod user_service;
