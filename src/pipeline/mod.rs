//! Pipeline stages for archiving one URL.
//!
//! Each submodule implements one transformation step and is testable on its
//! own. External capabilities (readability, Markdown→blocks, the classifier
//! model, the image host) sit behind traits so tests can swap in fakes.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ normalize ──▶ classify ──▶ blocks ──▶ postprocess
//! (URL)     (HTML or    (Markdown,    (tags)       (block     (publishable
//!            LaTeX→MD)   cleansed)                  tree)      blocks)
//! ```
//!
//! 1. [`input`]   canonicalise the URL and pick the standard or academic branch
//! 2. [`extract`] readability for standard pages; [`arxiv`] for papers, which
//!    rasterises PDF figures through [`render`] and typesets through pandoc
//! 3. [`normalize`] HTML→Markdown, and the cleansed classifier text
//! 4. [`classify`] threshold search over scores from [`inference`] or [`llm`]
//! 5. [`blocks`]  Markdown→block tree via the converter command
//! 6. [`postprocess`] image re-hosting through [`imagehost`], link
//!    sanitisation, chunking and substitution
//!
//! [`command`] runs the external programs the stages shell out to.

pub mod arxiv;
pub mod blocks;
pub mod classify;
pub mod command;
pub mod extract;
pub mod imagehost;
pub mod inference;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod postprocess;
pub mod render;
