use crate::config::Config;
use crate::model::{Agent, Decision, Ratios, State};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Normal, Uniform};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, current population state, random number generator
/// and opinion trajectory history, and provides methods to initialize, run,
/// save, and load simulations. Every stochastic draw of a run consumes the
/// single owned generator, so a run is fully determined by its seed.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    state: State,
    rng: ChaCha12Rng,
    history: Vec<Vec<f64>>,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and seed.
    ///
    /// Builds the population, designates the extremists and constructs the
    /// directed influence network.
    pub fn generate_initial_condition(cfg: Config, seed: u64) -> Result<Self> {
        let mut rng = ChaCha12Rng::seed_from_u64(seed);

        let n_agt = cfg.network.n_agt;
        let rho = cfg.dynamics.rho;

        let op_dist = Normal::new(cfg.opinion.m_s, cfg.opinion.sd_s)?;
        let mut agt_vec = Vec::with_capacity(n_agt);
        for id in 0..n_agt {
            let mut agt = Agent::new(id, op_dist.sample(&mut rng), cfg.opinion.u_s);
            agt.update_status(0, rho);
            agt_vec.push(agt);
        }

        // Designate the top agents by social opinion as extremists and narrow
        // their uncertainty before the network and dynamics exist.
        let n_ex = ((n_agt as f64) * cfg.network.ratio_ex).round() as usize;
        let n_ex = n_ex.min(n_agt);
        if n_ex > 0 {
            let mut order: Vec<usize> = (0..n_agt).collect();
            order.sort_by(|&a, &b| agt_vec[b].soc_op().total_cmp(&agt_vec[a].soc_op()));
            for &i_agt in &order[..n_ex] {
                agt_vec[i_agt].make_extremist(cfg.network.u_s_ex);
                agt_vec[i_agt].update_status(0, rho);
            }
        }

        // Build the directed influence edges. The edge count, not the degree,
        // is fixed; each draw excludes self-loops but not repeated pairs.
        let n_edges = cfg.network.media.edge_factor() * n_agt;
        let endpoint_dist = Uniform::new(0, n_agt)?;
        for _ in 0..n_edges {
            let u = endpoint_dist.sample(&mut rng);
            let mut v = endpoint_dist.sample(&mut rng);
            while v == u {
                v = endpoint_dist.sample(&mut rng);
            }
            agt_vec[u].add_peer(v);
        }

        let state = State { step: 0, agt_vec };
        let history = vec![state.agt_vec.iter().map(Agent::soc_op).collect()];

        Ok(Self {
            cfg,
            state,
            rng,
            history,
        })
    }

    /// Perform `n_steps` simulation steps and save trajectory frames to a
    /// binary file.
    ///
    /// A fresh run also saves the initial state as the first frame.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        if self.state.step == 0 {
            encode::write(&mut writer, &self.state).context("failed to serialize state")?;
        }

        for _ in 0..self.cfg.run.n_steps {
            self.perform_step().context("failed to perform step")?;

            if self.state.step % self.cfg.output.steps_per_save == 0 {
                encode::write(&mut writer, &self.state).context("failed to serialize state")?;
            }

            if self.state.step % self.cfg.output.steps_per_log == 0 {
                let ratios = self.state.ratios();
                log::info!(
                    "step {:5}: informed {:5.1}%, adopted {:5.1}%, not concerned {:5.1}%",
                    self.state.step,
                    100.0 * ratios.informed,
                    100.0 * ratios.adopted,
                    100.0 * ratios.not_concerned
                );
            }
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Advance the simulation by one timestep.
    ///
    /// The three phases run population-wide in strict order; discussion
    /// writes only into per-agent buffers, which the update phase commits,
    /// so no agent observes another agent's uncommitted state mid-step.
    pub fn perform_step(&mut self) -> Result<()> {
        let step = self.state.step + 1;

        self.media_phase(step)
            .context("failed to perform media phase")?;
        self.discussion_phase(step)
            .context("failed to perform discussion phase")?;
        self.update_phase(step)
            .context("failed to perform update phase")?;

        self.state.step = step;
        self.history
            .push(self.state.agt_vec.iter().map(Agent::soc_op).collect());

        Ok(())
    }

    fn media_phase(&mut self, step: usize) -> Result<()> {
        let exposure_dist = Bernoulli::new(self.cfg.network.media.reception_prob())?;
        let benefit_dist = Normal::new(self.cfg.opinion.m_i, self.cfg.opinion.sd_i)?;
        let u_i = self.cfg.opinion.u_i;
        let rho = self.cfg.dynamics.rho;

        for agt in &mut self.state.agt_vec {
            if agt.decision() == Decision::Adoption {
                continue;
            }
            if !exposure_dist.sample(&mut self.rng) {
                continue;
            }

            if !agt.informed() && agt.decision() == Decision::InfoRequest {
                agt.acquire_info(&mut self.rng, &benefit_dist, u_i);
                agt.update_status(step, rho);
            }

            // The media event is talked about regardless of prior information.
            agt.push_topic(step);
        }

        Ok(())
    }

    fn discussion_phase(&mut self, step: usize) -> Result<()> {
        let transmit_dist = Bernoulli::new(self.cfg.dynamics.omega)?;
        let gamma = self.cfg.dynamics.gamma;
        let mu = self.cfg.dynamics.mu;

        for i_agt in 0..self.state.agt_vec.len() {
            if self.state.agt_vec[i_agt].decision() == Decision::Adoption {
                continue;
            }

            let speaker = &mut self.state.agt_vec[i_agt];
            let topics = speaker.take_topics();
            if topics.is_empty() {
                continue;
            }
            let peers = speaker.peers().to_vec();
            let (soc_op, soc_unc, informed) =
                (speaker.soc_op(), speaker.soc_unc(), speaker.informed());

            for &origin in &topics {
                // Salience of the information decays with its age; fully
                // decayed entries are dropped without further propagation.
                let share = (1.0 - gamma * (step - origin) as f64).max(0.0);
                let n_talk = (peers.len() as f64 * share).round() as usize;
                if n_talk == 0 {
                    continue;
                }

                // Sample listeners uniformly with replacement.
                for _ in 0..n_talk {
                    let &i_peer = peers
                        .choose(&mut self.rng)
                        .context("failed to choose a discussion peer")?;
                    let peer = &mut self.state.agt_vec[i_peer];
                    if peer.decision() == Decision::Adoption {
                        continue;
                    }

                    peer.receive_influence(soc_op, soc_unc, mu);

                    if informed
                        && !peer.informed()
                        && peer.decision() == Decision::InfoRequest
                        && transmit_dist.sample(&mut self.rng)
                    {
                        peer.flag_pending_info();
                    }

                    peer.relay_topic(origin);
                }
            }
        }

        Ok(())
    }

    fn update_phase(&mut self, step: usize) -> Result<()> {
        let benefit_dist = Normal::new(self.cfg.opinion.m_i, self.cfg.opinion.sd_i)?;
        let u_i = self.cfg.opinion.u_i;
        let rho = self.cfg.dynamics.rho;

        for agt in &mut self.state.agt_vec {
            if agt.decision() == Decision::Adoption {
                continue;
            }

            agt.commit_deltas();
            agt.swap_topic_queues();

            if agt.take_pending_info() {
                agt.acquire_info(&mut self.rng, &benefit_dist, u_i);
            }

            agt.update_status(step, rho);

            if agt.decision() == Decision::Adoption {
                log::debug!("agent {} adopted at step {step}", agt.id());
            }
        }

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Per-step snapshots of all social opinions, starting with the initial
    /// state.
    pub fn history(&self) -> &[Vec<f64>] {
        &self.history
    }

    pub fn ratios(&self) -> Ratios {
        self.state.ratios()
    }
}
