use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Interest classification of an agent, recomputed at every status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interest {
    No,
    Maybe,
    Yes,
}

/// Decision state of an agent.
///
/// `Adoption` is terminal: once reached, the agent is frozen and no phase
/// touches it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    NotConcerned,
    InfoRequest,
    NoAdoption,
    PreAdoption,
    Adoption,
}

/// Privately perceived benefit estimate, acquired only on becoming informed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndOpinion {
    pub benefit: f64,
    pub unc: f64,
}

/// Agent of the simulation.
///
/// Each agent holds a social opinion interval (`soc_op` ± `soc_unc`), an
/// optional individual benefit estimate, the derived global opinion used for
/// interest classification, and the adoption-funnel decision state.
/// Discussion-induced changes accumulate in delta buffers and the next-round
/// topic queue, so that within a timestep no agent observes another agent's
/// uncommitted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    id: usize,

    soc_op: f64,
    soc_unc: f64,
    soc_op_delta: f64,
    soc_unc_delta: f64,

    ind: Option<IndOpinion>,

    glo_op: f64,
    glo_unc: f64,

    informed: bool,
    interest: Interest,
    decision: Decision,

    /// First step of the current uninterrupted pre-adoption stretch.
    pre_adoption_step: Option<usize>,

    extremist: bool,

    /// Outgoing influence edges, as indices into the population vector.
    peers: Vec<usize>,

    /// Origination steps of information this agent talks about, double-buffered.
    talk_queue: Vec<usize>,
    talk_queue_next: Vec<usize>,

    pending_info: bool,
}

impl Agent {
    /// Create a new uninformed agent with a given social opinion interval.
    ///
    /// The derived fields are placeholders until the first call to
    /// [`Agent::update_status`].
    pub fn new(id: usize, soc_op: f64, soc_unc: f64) -> Self {
        Self {
            id,
            soc_op,
            soc_unc,
            soc_op_delta: 0.0,
            soc_unc_delta: 0.0,
            ind: None,
            glo_op: soc_op,
            glo_unc: soc_unc,
            informed: false,
            interest: Interest::Maybe,
            decision: Decision::NotConcerned,
            pre_adoption_step: None,
            extremist: false,
            peers: Vec::new(),
            talk_queue: Vec::new(),
            talk_queue_next: Vec::new(),
            pending_info: false,
        }
    }

    /// Recompute global opinion, interest and decision.
    ///
    /// 1. Global opinion is the social opinion alone, or the unweighted
    ///    midpoint of social and individual components once informed.
    /// 2. Interest is `No` below the interval, `Yes` strictly above zero,
    ///    `Maybe` otherwise; `No` and `Maybe` reset the adoption timer.
    /// 3. The decision follows from information and interest; `Adoption` is
    ///    reached after `rho` uninterrupted pre-adoption steps and
    ///    short-circuits all further updates.
    pub fn update_status(&mut self, step: usize, rho: usize) {
        if self.decision == Decision::Adoption {
            return;
        }

        match self.ind {
            None => {
                self.glo_op = self.soc_op;
                self.glo_unc = self.soc_unc;
            }
            Some(ind) => {
                self.glo_op = (self.soc_op + ind.benefit) / 2.0;
                self.glo_unc = (self.soc_unc + ind.unc) / 2.0;
            }
        }

        if self.glo_op + self.glo_unc < 0.0 {
            self.interest = Interest::No;
            self.pre_adoption_step = None;
        } else if self.glo_op - self.glo_unc > 0.0 {
            self.interest = Interest::Yes;
        } else {
            self.interest = Interest::Maybe;
            self.pre_adoption_step = None;
        }

        if !self.informed {
            self.decision = match self.interest {
                Interest::Maybe | Interest::Yes => Decision::InfoRequest,
                Interest::No => Decision::NotConcerned,
            };
        } else if matches!(self.interest, Interest::No | Interest::Maybe) {
            self.decision = Decision::NoAdoption;
            self.pre_adoption_step = None;
        } else {
            match self.pre_adoption_step {
                Some(start) if step - start >= rho => self.decision = Decision::Adoption,
                Some(_) => self.decision = Decision::PreAdoption,
                None => {
                    self.decision = Decision::PreAdoption;
                    self.pre_adoption_step = Some(step);
                }
            }
        }
    }

    /// Become informed and draw the individual benefit estimate.
    pub fn acquire_info<R: Rng + ?Sized>(&mut self, rng: &mut R, benefit: &Normal<f64>, u_i: f64) {
        self.informed = true;
        self.ind = Some(IndOpinion {
            benefit: benefit.sample(rng),
            unc: u_i,
        });
    }

    /// Listener side of the bounded-confidence exchange.
    ///
    /// The speaker's interval must cover the listener's beyond the speaker's
    /// own uncertainty for any influence to occur; the change is accumulated
    /// into the delta buffers, not applied.
    pub fn receive_influence(&mut self, speaker_op: f64, speaker_unc: f64, mu: f64) {
        let overlap = (speaker_op + speaker_unc).min(self.soc_op + self.soc_unc)
            - (speaker_op - speaker_unc).max(self.soc_op - self.soc_unc);
        if overlap <= speaker_unc {
            return;
        }

        let strength = mu * (overlap / speaker_unc - 1.0);
        self.soc_op_delta += strength * (speaker_op - self.soc_op);
        self.soc_unc_delta += strength * (speaker_unc - self.soc_unc);
    }

    /// Apply the buffered discussion deltas and zero them.
    pub fn commit_deltas(&mut self) {
        self.soc_op += self.soc_op_delta;
        self.soc_unc += self.soc_unc_delta;
        self.soc_op_delta = 0.0;
        self.soc_unc_delta = 0.0;
    }

    pub(crate) fn make_extremist(&mut self, u_s_ex: f64) {
        self.extremist = true;
        self.soc_unc = u_s_ex;
    }

    pub(crate) fn add_peer(&mut self, peer: usize) {
        self.peers.push(peer);
    }

    pub(crate) fn push_topic(&mut self, step: usize) {
        self.talk_queue.push(step);
    }

    pub(crate) fn relay_topic(&mut self, origin: usize) {
        self.talk_queue_next.push(origin);
    }

    /// Drain the live topic queue for one discussion phase.
    pub(crate) fn take_topics(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.talk_queue)
    }

    pub(crate) fn swap_topic_queues(&mut self) {
        self.talk_queue = std::mem::take(&mut self.talk_queue_next);
    }

    pub(crate) fn flag_pending_info(&mut self) {
        self.pending_info = true;
    }

    pub(crate) fn take_pending_info(&mut self) -> bool {
        std::mem::take(&mut self.pending_info)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the current social opinion of the agent.
    pub fn soc_op(&self) -> f64 {
        self.soc_op
    }

    /// Get the current social opinion uncertainty of the agent.
    pub fn soc_unc(&self) -> f64 {
        self.soc_unc
    }

    pub fn ind(&self) -> Option<IndOpinion> {
        self.ind
    }

    pub fn informed(&self) -> bool {
        self.informed
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn pre_adoption_step(&self) -> Option<usize> {
        self.pre_adoption_step
    }

    pub fn extremist(&self) -> bool {
        self.extremist
    }

    pub fn peers(&self) -> &[usize] {
        &self.peers
    }

    pub fn talk_queue(&self) -> &[usize] {
        &self.talk_queue
    }
}

/// State of the simulation at a given step.
///
/// Contains the current step and all agents in the simulation; serialized
/// whole as a trajectory frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Current simulation step.
    pub step: usize,

    /// Vector of agents currently in the simulation.
    pub agt_vec: Vec<Agent>,
}

impl State {
    /// Compute the population shares by full scan.
    pub fn ratios(&self) -> Ratios {
        let n = self.agt_vec.len() as f64;
        Ratios {
            informed: self.agt_vec.iter().filter(|ag| ag.informed).count() as f64 / n,
            adopted: self
                .agt_vec
                .iter()
                .filter(|ag| ag.decision == Decision::Adoption)
                .count() as f64
                / n,
            not_concerned: self
                .agt_vec
                .iter()
                .filter(|ag| ag.decision == Decision::NotConcerned)
                .count() as f64
                / n,
        }
    }
}

/// Aggregate population shares, recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ratios {
    pub informed: f64,
    pub adopted: f64,
    pub not_concerned: f64,
}
