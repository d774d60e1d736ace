//! Generator errors and results

use std::fmt;

use recast::RecastContext;
use thiserror::Error;

/// Step of a generator run that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    Config,
    Bounds,
    Heightfield,
    CompactHeightfield,
    Regions,
    Contours,
    PolyMesh,
    DetailMesh,
    Layers,
    NavMeshData,
    NavMeshInit,
    TileCache,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Bounds => "bounds",
            Self::Heightfield => "heightfield",
            Self::CompactHeightfield => "compact heightfield",
            Self::Regions => "regions",
            Self::Contours => "contours",
            Self::PolyMesh => "poly mesh",
            Self::DetailMesh => "detail mesh",
            Self::Layers => "heightfield layers",
            Self::NavMeshData => "navmesh data",
            Self::NavMeshInit => "navmesh init",
            Self::TileCache => "tile cache",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage}: {message}")]
pub struct GeneratorError {
    pub stage: BuildStage,
    pub message: String,
}

impl GeneratorError {
    pub fn new(stage: BuildStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    /// Maps any displayable error into a failure of `stage`
    pub(crate) fn at<E: fmt::Display>(stage: BuildStage) -> impl FnOnce(E) -> Self {
        move |e| Self::new(stage, e.to_string())
    }
}

/// Outcome of a generator run
///
/// The intermediates are returned whether or not the run succeeded, so a
/// failed build can still be inspected through its context log.
#[derive(Debug)]
pub struct Generated<T, I> {
    pub result: Result<T, GeneratorError>,
    pub intermediates: I,
}

impl<T, I> Generated<T, I> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&GeneratorError> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, GeneratorError> {
        self.result
    }
}

/// Records a failed run in the build context and the log facade
pub(crate) fn report<T>(ctx: &mut RecastContext, result: &Result<T, GeneratorError>) {
    if let Err(e) = result {
        log::error!("navmesh generation failed at {}", e);
        ctx.log_error(e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_the_stage() {
        let err = GeneratorError::new(BuildStage::DetailMesh, "out of samples");
        assert_eq!(err.to_string(), "detail mesh: out of samples");

        let mapped = GeneratorError::at(BuildStage::Contours)("bad region");
        assert_eq!(mapped.stage, BuildStage::Contours);
        assert_eq!(mapped.message, "bad region");
    }

    #[test]
    fn test_generated_accessors() {
        let ok: Generated<u32, ()> = Generated {
            result: Ok(3),
            intermediates: (),
        };
        assert!(ok.success());
        assert!(ok.error().is_none());

        let failed: Generated<u32, ()> = Generated {
            result: Err(GeneratorError::new(BuildStage::Config, "tile size must be positive")),
            intermediates: (),
        };
        assert!(!failed.success());
        assert_eq!(failed.error().map(|e| e.stage), Some(BuildStage::Config));
        assert!(failed.into_result().is_err());
    }
}
