//! # Deep Research
//!
//! A research assistant service. A query is turned into a structured prompt,
//! sent to a hosted language model, and the reply is normalized into a
//! [`models::ResearchSession`]: a titled paper with `[n]` citation markers,
//! a bibliography, and suggested figures. Sessions can be continued, exported
//! to PDF or Google Docs, and every export is recorded in a local history.
//! Reference files can be uploaded to a provider-side vector store.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌────────┐   ┌───────┐   ┌───────────┐   ┌──────────┐
//! │ prompt │──▶│  llm   │──▶│ norm- │──▶│ research  │──▶│ pdf      │──┐
//! │        │   │ client │   │ alize │   │ session   │   │ gdocs    │  │
//! └────────┘   └────────┘   └───────┘   └─────┬─────┘   └──────────┘  │
//!                                             │                       ▼
//!                                   ┌─────────┴────────┐       ┌────────────┐
//!                                   │ CLI (dr) / HTTP  │       │  history   │
//!                                   │ server + proxy   │       │  (SQLite)  │
//!                                   └──────────────────┘       └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Session and history data types |
//! | [`prompt`] | Prompt and request-body construction |
//! | [`llm`] | Model client trait and HTTP implementation |
//! | [`normalize`] | Model reply normalization |
//! | [`citations`] | `[n]` marker linking |
//! | [`html`] | HTML to plain text |
//! | [`research`] | One research turn, including continuations |
//! | [`pdf`] | Paginated PDF export |
//! | [`oauth`] | Google OAuth helpers and token slot |
//! | [`gdocs`] | Google Docs export |
//! | [`store`] | History storage |
//! | [`upload`] | Knowledge-file uploads to the provider's vector store |
//! | [`server`] | HTTP API and backend proxy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod citations;
pub mod config;
pub mod db;
pub mod error;
pub mod gdocs;
pub mod html;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod oauth;
pub mod pdf;
pub mod prompt;
pub mod research;
pub mod server;
pub mod store;
pub mod upload;
