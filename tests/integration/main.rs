//! Integration tests for Trendcrawl

mod scheduler_tests;
