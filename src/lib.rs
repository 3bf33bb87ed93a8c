//! Resilient content-acquisition and e-book packaging pipeline for the
//! interchangeable Hako family of light-novel sites.
//!
//! Component layering follows §2 of the originating design: the proxy
//! grammar and pool sit under the Network Fabric, which the Catalog Parser
//! and Chapter Downloader both use; the Content Engine normalizes what the
//! Downloader fetches; the Packager/Unpackager pair round-trips the
//! canonical on-disk form through an e-book container.

pub mod books_index;
pub mod catalog;
pub mod config;
pub mod content;
pub mod downloader;
pub mod error;
pub mod net;
pub mod packager;
pub mod proxy;
pub mod slug;
pub mod unpackager;
