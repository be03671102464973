//! # POS Assistant
//!
//! Page-content indexing and question answering for a point-of-sale admin
//! dashboard.
//!
//! The assistant scans dashboard routes, keeps the visible text of each page
//! in a local cache, and answers questions about it: first with a handful of
//! counting rules (out-of-stock, low-stock, inventory, sales, customers),
//! then by handing the question and the cached text to a hosted model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌──────────────┐
//! │ POS routes  │──▶│ extract  │──▶│  page cache  │
//! │ saved HTML  │   │ (scraper)│   │   (SQLite)   │
//! └─────────────┘   └──────────┘   └──────┬───────┘
//!                                         │ combined context
//!                                         ▼
//!                   ┌──────────┐   ┌──────────────┐
//!     question ───▶ │  rules   │──▶│ Gemini model │
//!                   └────┬─────┘   └──────┬───────┘
//!                        ▼                ▼
//!                   ┌──────────────────────────┐
//!                   │ chat sessions · CLI · HTTP│
//!                   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! posa init                          # create database
//! posa scan                          # scan the default dashboard routes
//! posa ask "How many products are out of stock?"
//! posa chat new && posa chat send "What is the total revenue?"
//! posa serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | HTML to visible text |
//! | [`page_store`] | Per-route text cache and combined context |
//! | [`scan`] | Route, current-page and snapshot scanning |
//! | [`heuristics`] | Rule-based counters and answers |
//! | [`llm`] | Generative model fallback |
//! | [`answer`] | The chat answer pipeline |
//! | [`chat`] | Chat sessions and the send flow |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chat;
pub mod config;
pub mod db;
pub mod extract;
pub mod heuristics;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod page_store;
pub mod scan;
pub mod server;
