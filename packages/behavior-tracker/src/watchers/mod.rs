//! Trigger watchers.
//!
//! Both watchers register exactly once at bootstrap and read the catalog live
//! on every check, so refreshes never require re-binding.

pub mod click;
pub mod page_view;

pub use click::click_matches;
pub use page_view::page_view_matches;
