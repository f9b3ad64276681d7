//! Render pipeline building blocks: fenced-block extraction, artifact storage and the
//! renderer that turns LaTeX source into a PNG.

mod artifact;
mod extract;
mod invoker;

pub use artifact::{Artifact, ArtifactError, ArtifactStore};
pub use extract::{extract_code_block, FENCE};
pub use invoker::{check_source, first_latex_error, wrap_document, LatexRenderer, RenderError, Renderer};
