pub mod leaderboard;
pub mod point_event;
pub mod user;
