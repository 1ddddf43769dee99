//! Navigation cursor for message windows over a live header list.
//!
//! A [`nav::NavigationFacade`] remembers which list row a window displays,
//! precomputes the next visible row, resolves headers into messages through
//! a [`fetch::FetchService`], and keeps all of that consistent while the
//! list is edited, reordered or replaced underneath it.

pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod mail;
pub mod model;
pub mod nav;
pub mod replay;
pub mod store;
