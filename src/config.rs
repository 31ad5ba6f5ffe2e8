use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Media coverage and network density mode.
///
/// Determines both the per-step probability of receiving information from the
/// media and the number of influence edges built at population construction.
/// Unrecognized modes are rejected at deserialization time.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDensity {
    Low,
    High,
}

impl MediaDensity {
    /// Per-step probability of media exposure for a single agent.
    pub fn reception_prob(self) -> f64 {
        match self {
            MediaDensity::Low => 0.1,
            MediaDensity::High => 0.4,
        }
    }

    /// Number of influence edges per agent of the population.
    pub fn edge_factor(self) -> usize {
        match self {
            MediaDensity::Low => 1,
            MediaDensity::High => 4,
        }
    }
}

/// Opinion distribution parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OpinionCfg {
    /// Mean of the normal distribution of initial social opinions.
    pub m_s: f64,
    /// Standard deviation of the normal distribution of initial social opinions.
    pub sd_s: f64,
    /// Social opinion uncertainty of the moderates.
    pub u_s: f64,

    /// Mean of the normal distribution of individual benefit.
    pub m_i: f64,
    /// Standard deviation of the normal distribution of individual benefit.
    pub sd_i: f64,
    /// Individual benefit uncertainty.
    pub u_i: f64,
}

/// Population and network parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct NetworkCfg {
    /// Number of agents.
    pub n_agt: usize,
    /// Ratio of extremists.
    pub ratio_ex: f64,
    /// Social opinion uncertainty of the extremists.
    pub u_s_ex: f64,
    /// Media coverage and network density mode.
    pub media: MediaDensity,
}

/// Discussion dynamics parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DynamicsCfg {
    /// Probability of transmitting information during discussion.
    pub omega: f64,
    /// Decay rate of the share of neighbors reached by aging information.
    pub gamma: f64,
    /// Intensity of the social influence during discussion.
    pub mu: f64,
    /// Number of consecutive pre-adoption steps required for adoption.
    pub rho: usize,
}

/// Run length and seeding parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunCfg {
    /// Number of steps per simulation pass.
    pub n_steps: usize,
    /// Maximum number of runs in a simulation directory.
    pub n_runs: usize,
    /// Base random seed (run `idx` uses `rnd_seed + idx`).
    pub rnd_seed: u64,
}

/// Output cadence parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputCfg {
    /// Number of steps between trajectory frames.
    pub steps_per_save: usize,
    /// Number of steps between logged ratio reports.
    pub steps_per_log: usize,
}

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub opinion: OpinionCfg,
    pub network: NetworkCfg,
    pub dynamics: DynamicsCfg,
    pub run: RunCfg,
    pub output: OutputCfg,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.opinion.m_s, -100.0..100.0).context("invalid social opinion mean")?;
        check_num(self.opinion.sd_s, 0.0..100.0)
            .context("invalid social opinion standard deviation")?;
        check_num(self.opinion.u_s, 1e-9..100.0).context("invalid social uncertainty")?;
        check_num(self.opinion.m_i, -100.0..100.0).context("invalid individual benefit mean")?;
        check_num(self.opinion.sd_i, 0.0..100.0)
            .context("invalid individual benefit standard deviation")?;
        check_num(self.opinion.u_i, 0.0..100.0).context("invalid individual uncertainty")?;

        check_num(self.network.n_agt, 2..1_000_000).context("invalid number of agents")?;
        check_num(self.network.ratio_ex, 0.0..100.0).context("invalid extremist ratio")?;
        check_num(self.network.u_s_ex, 1e-9..100.0).context("invalid extremist uncertainty")?;

        check_num(self.dynamics.omega, 0.0..=1.0).context("invalid transmission probability")?;
        check_num(self.dynamics.gamma, 1e-9..=1.0).context("invalid discussion decay rate")?;
        check_num(self.dynamics.mu, 0.0..=1.0).context("invalid influence intensity")?;
        check_num(self.dynamics.rho, 1..10_000).context("invalid adoption step count")?;

        check_num(self.run.n_steps, 1..1_000_000).context("invalid number of steps")?;
        check_num(self.run.n_runs, 1..10_000).context("invalid number of runs")?;

        check_num(self.output.steps_per_save, 1..1_000_000)
            .context("invalid number of steps per save")?;
        check_num(self.output.steps_per_log, 1..1_000_000)
            .context("invalid number of steps per log")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
