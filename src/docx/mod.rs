pub mod annotate;
pub mod consolidate;
pub mod entities;
pub mod package;
pub mod paragraphs;
pub mod pure_text;
pub mod splice;
pub mod tags;
pub mod xml;
