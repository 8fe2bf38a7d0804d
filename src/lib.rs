//! # Knowledge Cache
//!
//! Named, locally persisted knowledge bases built from documents, kept in
//! step with a SharePoint folder when autosync is on.
//!
//! A cache is created once from a local file/directory or a SharePoint
//! sharing link. Activating a SharePoint cache with autosync enabled lists
//! the remote folder, compares its manifest with the stored one, and only
//! rebuilds when something changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────────┐
//! │ SharePoint   │──▶│ Manifest + Change  │──▶│ Fetch + Extract  │
//! │ (Graph API)  │   │     Detector       │   │ pdf/docx/pptx/.. │
//! └──────────────┘   └─────────┬──────────┘   └────────┬─────────┘
//!                              │ unchanged             ▼
//!                              │              ┌──────────────────┐
//!                              │              │ Knowledge Builder│
//!                              │              │ chunk (+ embed)  │
//!                              ▼              └────────┬─────────┘
//!                      ┌──────────────┐                ▼
//!                      │   Session    │◀──── index.json + config.json
//!                      └──────────────┘        (Cache Store)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kc add-sharepoint "https://contoso.sharepoint.com/:f:/s/hr/..." --name policies
//! kc ask policies "how many vacation days?"
//! kc autosync policies off
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | File descriptors, chunks, passages |
//! | [`manifest`] | Manifest builder and change detector |
//! | [`sharepoint`] | Graph client and folder traversal |
//! | [`extract`] | Text extraction by file type |
//! | [`fetch`] | Download and concatenate remote text |
//! | [`local`] | Local file and directory sources |
//! | [`chunk`] | Paragraph chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`knowledge`] | Index artifact and retrieval |
//! | [`store`] | Per-cache config persistence |
//! | [`sync`] | Session and sync orchestration |
//! | [`traits`] | `RemoteSource` / `KnowledgeBuilder` seams |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod knowledge;
pub mod local;
pub mod manifest;
pub mod models;
pub mod sharepoint;
pub mod store;
pub mod sync;
pub mod traits;
