//! Template rendering.
//!
//! This module turns a resolved variable set into a canonical,
//! content-hashed configuration document:
//! - Sections, blocks and the rendered document
//! - Typed section inputs with dialect range limits
//! - NX-OS and EOS statement spelling
//! - The section-by-section, fail-soft renderer

mod dialect;
mod document;
mod eos;
mod inputs;
mod nxos;
mod renderer;

pub use dialect::{DialectLimits, DialectSyntax, syntax_for};
pub use document::{ConfigBlock, RenderedConfig, Section, Stanza, stanzas};
pub use eos::EosSyntax;
pub use inputs::{
    ConsoleLineInput, InterfaceInput, LacpMode, LinesInput, LoopbackInput, PortChannelInput,
    Range, VlanEntry, VniMappings, VtyLineInput, natural_cmp,
};
pub use nxos::NxosSyntax;
pub use renderer::{RenderOutcome, SectionError, Template, TemplateRenderer, TemplateSection};
