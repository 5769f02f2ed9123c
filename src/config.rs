use core::fmt;
use core::str::FromStr;

/// Linear solver family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SolverKind {
    /// Chosen by the manager from matrix properties.
    #[default]
    Auto,
    Direct,
    ConjugateGradient,
    BiConjugateGradient,
    BiCgStab,
}

impl SolverKind {
    /// Whether the solver iterates and therefore consumes a preconditioner.
    pub fn is_iterative(self) -> bool {
        matches!(
            self,
            Self::ConjugateGradient | Self::BiConjugateGradient | Self::BiCgStab
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Direct => "direct",
            Self::ConjugateGradient => "conjugate gradient",
            Self::BiConjugateGradient => "biconjugate gradient",
            Self::BiCgStab => "BiCGSTAB",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SolverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "auto" => Ok(Self::Auto),
            "direct" | "lu" => Ok(Self::Direct),
            "conjugategradient" | "cg" => Ok(Self::ConjugateGradient),
            "biconjugategradient" | "bicg" => Ok(Self::BiConjugateGradient),
            "bicgstab" | "biconjugategradientstabilized" => Ok(Self::BiCgStab),
            _ => Err(ConfigError::UnknownSolver(s.to_string())),
        }
    }
}

/// Preconditioner selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PreconditionerKind {
    /// Derived by the manager from a conditioning probe.
    #[default]
    Auto,
    /// Identity.
    None,
    Jacobi,
    BlockJacobi,
    LeftScaling,
    SymmetricScaling,
    ApproximateInverse,
    /// A few inner Richardson/Jacobi sweeps per application.
    Iterative,
}

impl PreconditionerKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
            Self::Jacobi => "jacobi",
            Self::BlockJacobi => "block jacobi",
            Self::LeftScaling => "left scaling",
            Self::SymmetricScaling => "symmetric scaling",
            Self::ApproximateInverse => "approximate inverse",
            Self::Iterative => "iterative",
        }
    }
}

impl fmt::Display for PreconditionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PreconditionerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "auto" => Ok(Self::Auto),
            "none" | "identity" => Ok(Self::None),
            "jacobi" => Ok(Self::Jacobi),
            "blockjacobi" => Ok(Self::BlockJacobi),
            "leftscaling" => Ok(Self::LeftScaling),
            "symmetricscaling" => Ok(Self::SymmetricScaling),
            "approximateinverse" | "approxinverse" => Ok(Self::ApproximateInverse),
            "iterative" | "richardson" => Ok(Self::Iterative),
            _ => Err(ConfigError::UnknownPreconditioner(s.to_string())),
        }
    }
}

/// Compute device a solve runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA device by ordinal. No CUDA backend ships with this crate.
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "cpu" {
            return Ok(Self::Cpu);
        }
        if lower == "cuda" {
            return Ok(Self::Cuda(0));
        }
        lower
            .strip_prefix("cuda:")
            .and_then(|ordinal| ordinal.parse().ok())
            .map(Self::Cuda)
            .ok_or_else(|| ConfigError::UnknownDevice(s.to_string()))
    }
}

/// Configuration errors, reported before any computation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownSolver(String),
    UnknownPreconditioner(String),
    UnknownDevice(String),
    /// max_iters must be positive.
    ZeroIterations,
    /// tolerance must be finite and non-negative.
    InvalidTolerance(f64),
    /// block_size must be positive.
    ZeroBlockSize,
    /// The device exists in the configuration but has no backend here.
    DeviceUnavailable(Device),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSolver(name) => write!(f, "'{name}' is not a valid solver name"),
            Self::UnknownPreconditioner(name) => {
                write!(f, "'{name}' is not a valid preconditioner name")
            }
            Self::UnknownDevice(name) => write!(f, "'{name}' is not a valid device"),
            Self::ZeroIterations => write!(f, "max_iters must be greater than 0"),
            Self::InvalidTolerance(tol) => {
                write!(f, "tolerance must be finite and >= 0 (got {tol})")
            }
            Self::ZeroBlockSize => write!(f, "block_size must be greater than 0"),
            Self::DeviceUnavailable(device) => {
                write!(f, "device {device} is not available in this build")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Immutable solver configuration. Build it with [`SolverConfig::builder`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    solver: SolverKind,
    preconditioner: PreconditionerKind,
    max_iters: usize,
    tolerance: f64,
    block_size: usize,
    device: Device,
    verbose: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::Auto,
            preconditioner: PreconditionerKind::Auto,
            max_iters: 100,
            tolerance: 1e-8,
            block_size: 3,
            device: Device::Cpu,
            verbose: false,
        }
    }
}

impl SolverConfig {
    pub fn builder() -> SolverConfigBuilder {
        SolverConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builds a configuration from the names the host UI stores.
    pub fn from_names(solver: &str, preconditioner: &str) -> Result<Self, ConfigError> {
        Self::builder()
            .solver(solver.parse()?)
            .preconditioner(preconditioner.parse()?)
            .build()
    }

    pub fn solver(&self) -> SolverKind {
        self.solver
    }

    pub fn preconditioner(&self) -> PreconditionerKind {
        self.preconditioner
    }

    /// Iteration cap for iterative solvers.
    pub fn max_iters(&self) -> usize {
        self.max_iters
    }

    /// Absolute residual 2-norm below which an iterative solve stops.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Block order used by block-Jacobi (3 for x/y/z per vertex).
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Emit a per-iteration table when no reporter is supplied.
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

/// Validating builder for [`SolverConfig`].
#[derive(Debug, Clone)]
pub struct SolverConfigBuilder {
    config: SolverConfig,
}

impl SolverConfigBuilder {
    pub fn solver(mut self, solver: SolverKind) -> Self {
        self.config.solver = solver;
        self
    }

    pub fn preconditioner(mut self, preconditioner: PreconditionerKind) -> Self {
        self.config.preconditioner = preconditioner;
        self
    }

    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.config.max_iters = max_iters;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn build(self) -> Result<SolverConfig, ConfigError> {
        let config = self.config;
        if config.max_iters == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !config.tolerance.is_finite() || config.tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(config.tolerance));
        }
        if config.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        Ok(config)
    }
}

fn normalize_name(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_labels() {
        assert_eq!("AUTO".parse::<SolverKind>().unwrap(), SolverKind::Auto);
        assert_eq!(
            "Conjugate Gradient".parse::<SolverKind>().unwrap(),
            SolverKind::ConjugateGradient
        );
        assert_eq!(
            "Biconjugate Gradient".parse::<SolverKind>().unwrap(),
            SolverKind::BiConjugateGradient
        );
        assert_eq!("BiCGSTAB".parse::<SolverKind>().unwrap(), SolverKind::BiCgStab);
        assert_eq!(
            "Left Scaling".parse::<PreconditionerKind>().unwrap(),
            PreconditionerKind::LeftScaling
        );
        assert_eq!("NONE".parse::<PreconditionerKind>().unwrap(), PreconditionerKind::None);
        assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        assert_eq!(
            SolverConfig::from_names("GMRES", "NONE").unwrap_err(),
            ConfigError::UnknownSolver("GMRES".to_string())
        );
        assert_eq!(
            SolverConfig::from_names("Direct", "ILU").unwrap_err(),
            ConfigError::UnknownPreconditioner("ILU".to_string())
        );
    }

    #[test]
    fn builder_validates_fields() {
        assert_eq!(
            SolverConfig::builder().max_iters(0).build().unwrap_err(),
            ConfigError::ZeroIterations
        );
        assert!(matches!(
            SolverConfig::builder().tolerance(-1.0).build(),
            Err(ConfigError::InvalidTolerance(_))
        ));
        assert_eq!(
            SolverConfig::builder().block_size(0).build().unwrap_err(),
            ConfigError::ZeroBlockSize
        );
        let config = SolverConfig::builder().tolerance(0.0).build().unwrap();
        assert_eq!(config.tolerance(), 0.0);
    }
}
