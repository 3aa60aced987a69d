pub mod common;

mod leaderboard_tests;
