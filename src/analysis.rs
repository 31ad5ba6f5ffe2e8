use crate::config::Config;
use crate::model::{Ratios, State};
use crate::stats::Accumulator;
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::Serialize;
use serde_value::Value;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, state: &State) -> Result<()>;
    fn report(&self) -> Result<Value>;
}

fn labeled(label: &str, value: Value) -> Value {
    let mut map = BTreeMap::new();
    map.insert(Value::String(label.to_string()), value);
    Value::Map(map)
}

/// Per-frame population shares of the decision states.
pub struct DecisionShares {
    informed: Vec<f64>,
    adopted: Vec<f64>,
    not_concerned: Vec<f64>,
}

impl DecisionShares {
    pub fn new(cfg: &Config) -> Self {
        let cap = cfg.run.n_steps + 1;
        Self {
            informed: Vec::with_capacity(cap),
            adopted: Vec::with_capacity(cap),
            not_concerned: Vec::with_capacity(cap),
        }
    }
}

impl Obs for DecisionShares {
    fn update(&mut self, state: &State) -> Result<()> {
        let ratios = state.ratios();
        self.informed.push(ratios.informed);
        self.adopted.push(ratios.adopted);
        self.not_concerned.push(ratios.not_concerned);
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        #[derive(Serialize)]
        struct Curves<'a> {
            informed: &'a [f64],
            adopted: &'a [f64],
            not_concerned: &'a [f64],
        }

        let value = serde_value::to_value(Curves {
            informed: &self.informed,
            adopted: &self.adopted,
            not_concerned: &self.not_concerned,
        })
        .context("failed to serialize decision shares")?;
        Ok(labeled("decision_shares", value))
    }
}

/// Spread of the social opinions, accumulated over frames.
pub struct OpinionDispersion {
    acc: Accumulator,
}

impl OpinionDispersion {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for OpinionDispersion {
    fn update(&mut self, state: &State) -> Result<()> {
        let n_agt = state.agt_vec.len();
        if n_agt < 2 {
            return Ok(());
        }

        let mean = state.agt_vec.iter().map(|agt| agt.soc_op()).sum::<f64>() / n_agt as f64;
        let var = state
            .agt_vec
            .iter()
            .map(|agt| (agt.soc_op() - mean).powi(2))
            .sum::<f64>()
            / (n_agt - 1) as f64;

        self.acc.add(var.sqrt());
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        let value = serde_value::to_value(self.acc.report())
            .context("failed to serialize opinion dispersion")?;
        Ok(labeled("opinion_dispersion", value))
    }
}

/// Mean social opinion of the extremists and of the moderates, per frame.
pub struct ExtremistSplit {
    extremist: Vec<f64>,
    moderate: Vec<f64>,
}

impl ExtremistSplit {
    pub fn new() -> Self {
        Self {
            extremist: Vec::new(),
            moderate: Vec::new(),
        }
    }
}

impl Obs for ExtremistSplit {
    fn update(&mut self, state: &State) -> Result<()> {
        let mut sum_ex = 0.0;
        let mut n_ex = 0usize;
        let mut sum_mod = 0.0;
        let mut n_mod = 0usize;

        for agt in &state.agt_vec {
            if agt.extremist() {
                sum_ex += agt.soc_op();
                n_ex += 1;
            } else {
                sum_mod += agt.soc_op();
                n_mod += 1;
            }
        }

        if n_ex > 0 {
            self.extremist.push(sum_ex / n_ex as f64);
        }
        if n_mod > 0 {
            self.moderate.push(sum_mod / n_mod as f64);
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        #[derive(Serialize)]
        struct Curves<'a> {
            extremist: &'a [f64],
            moderate: &'a [f64],
        }

        let value = serde_value::to_value(Curves {
            extremist: &self.extremist,
            moderate: &self.moderate,
        })
        .context("failed to serialize extremist split")?;
        Ok(labeled("extremist_split", value))
    }
}

/// Step and population shares of the last frame seen.
pub struct FinalShares {
    last: Option<(usize, Ratios)>,
}

#[derive(Serialize)]
struct FinalSharesReport {
    step: usize,
    ratios: Ratios,
}

impl FinalShares {
    pub fn new() -> Self {
        Self { last: None }
    }
}

impl Obs for FinalShares {
    fn update(&mut self, state: &State) -> Result<()> {
        self.last = Some((state.step, state.ratios()));
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        let report = self
            .last
            .map(|(step, ratios)| FinalSharesReport { step, ratios });
        let value =
            serde_value::to_value(report).context("failed to serialize final shares")?;
        Ok(labeled("final_shares", value))
    }
}

/// Folds trajectory frames through the observables and saves their reports.
pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Self {
        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(DecisionShares::new(cfg)));
        obs_ptr_vec.push(Box::new(OpinionDispersion::new()));
        obs_ptr_vec.push(Box::new(ExtremistSplit::new()));
        obs_ptr_vec.push(Box::new(FinalShares::new()));
        Self { obs_ptr_vec }
    }

    /// Fold every state frame of a trajectory file through the observables.
    ///
    /// Frames are read until end of file, so the save cadence and the number
    /// of resume segments need no bookkeeping here.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        loop {
            let state: State = match decode::from_read(&mut reader) {
                Ok(state) => state,
                Err(decode::Error::InvalidMarkerRead(err))
                    if err.kind() == ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(err) => return Err(err).context("failed to read state frame"),
            };

            for obs in &mut self.obs_ptr_vec {
                obs.update(&state).context("failed to update observable")?;
            }
        }

        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let mut reports = Vec::with_capacity(self.obs_ptr_vec.len());
        for obs in &self.obs_ptr_vec {
            reports.push(obs.report().context("failed to report observable")?);
        }

        encode::write(&mut writer, &reports).context("failed to serialize reports")?;
        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }
}
