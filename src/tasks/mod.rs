pub mod round_scheduler;
