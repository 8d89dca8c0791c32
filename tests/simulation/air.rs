//! Simulated shared radio medium

#![allow(dead_code)]

use async_trait::async_trait;
use beacon_link::channel::{ChannelError, ChannelResult, MeshRadio};
use beacon_link::BeaconNode;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Link conditions applied to every transmission
#[derive(Debug, Clone)]
pub struct AirConfig {
    pub mtu: usize,
    /// Chance a frame never reaches one neighbour (0.0 - 1.0)
    pub loss_rate: f64,
    /// Chance a neighbour hears a frame twice (0.0 - 1.0)
    pub duplicate_rate: f64,
    /// Chance one byte of the frame is flipped (0.0 - 1.0)
    pub corruption_rate: f64,
    pub seed: u64,
}

impl Default for AirConfig {
    fn default() -> Self {
        Self {
            mtu: 512,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            corruption_rate: 0.0,
            seed: 7,
        }
    }
}

impl AirConfig {
    pub fn perfect() -> Self {
        Self::default()
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn noisy(duplicate_rate: f64, corruption_rate: f64) -> Self {
        Self {
            duplicate_rate,
            corruption_rate,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct AirStats {
    pub transmissions: AtomicU64,
    pub frames_heard: AtomicU64,
    pub frames_lost: AtomicU64,
    pub frames_duplicated: AtomicU64,
    pub frames_corrupted: AtomicU64,
}

impl AirStats {
    pub fn summary(&self) -> String {
        format!(
            "Transmissions: {}, Heard: {}, Lost: {}, Duplicated: {}, Corrupted: {}",
            self.transmissions.load(Ordering::Relaxed),
            self.frames_heard.load(Ordering::Relaxed),
            self.frames_lost.load(Ordering::Relaxed),
            self.frames_duplicated.load(Ordering::Relaxed),
            self.frames_corrupted.load(Ordering::Relaxed),
        )
    }
}

pub struct Air {
    config: AirConfig,
    links: Mutex<BTreeMap<String, BTreeSet<String>>>,
    inboxes: Mutex<BTreeMap<String, VecDeque<Bytes>>>,
    rng: Mutex<StdRng>,
    pub stats: AirStats,
}

impl Air {
    pub fn new(config: AirConfig) -> Arc<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        Arc::new(Self {
            config,
            links: Mutex::new(BTreeMap::new()),
            inboxes: Mutex::new(BTreeMap::new()),
            rng: Mutex::new(rng),
            stats: AirStats::default(),
        })
    }

    /// Radio handle for `node_id`
    pub fn radio(self: &Arc<Self>, node_id: &str) -> Arc<SimRadio> {
        self.links.lock().entry(node_id.to_string()).or_default();
        Arc::new(SimRadio {
            node_id: node_id.to_string(),
            air: Arc::clone(self),
        })
    }

    /// Two-way link
    pub fn link(&self, a: &str, b: &str) {
        let mut links = self.links.lock();
        links.entry(a.to_string()).or_default().insert(b.to_string());
        links.entry(b.to_string()).or_default().insert(a.to_string());
    }

    /// Nodes wired one after another: ids[0] - ids[1] - ... - ids[n-1]
    pub fn chain(&self, ids: &[&str]) {
        for pair in ids.windows(2) {
            self.link(pair[0], pair[1]);
        }
    }

    pub fn neighbours(&self, node_id: &str) -> Vec<String> {
        self.links
            .lock()
            .get(node_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn transmit(&self, from: &str, frame: Bytes) {
        self.stats.transmissions.fetch_add(1, Ordering::Relaxed);
        let neighbours = self.neighbours(from);
        let mut rng = self.rng.lock();
        let mut inboxes = self.inboxes.lock();

        for neighbour in neighbours {
            if rng.gen_bool(self.config.loss_rate) {
                self.stats.frames_lost.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let mut heard = frame.to_vec();
            if !heard.is_empty() && rng.gen_bool(self.config.corruption_rate) {
                let index = rng.gen_range(0..heard.len());
                heard[index] ^= 0xff;
                self.stats.frames_corrupted.fetch_add(1, Ordering::Relaxed);
            }
            let heard = Bytes::from(heard);

            let inbox = inboxes.entry(neighbour).or_default();
            if rng.gen_bool(self.config.duplicate_rate) {
                self.stats.frames_duplicated.fetch_add(1, Ordering::Relaxed);
                inbox.push_back(heard.clone());
            }
            inbox.push_back(heard);
        }
    }

    /// Take every frame currently waiting, in node order
    pub fn drain(&self) -> Vec<(String, Bytes)> {
        let mut inboxes = self.inboxes.lock();
        let mut frames = Vec::new();
        for (node_id, inbox) in inboxes.iter_mut() {
            frames.extend(inbox.drain(..).map(|frame| (node_id.clone(), frame)));
        }
        self.stats
            .frames_heard
            .fetch_add(frames.len() as u64, Ordering::Relaxed);
        frames
    }

    /// Deliver waiting frames to their nodes until the medium goes quiet.
    /// Returns the number of rounds it took.
    pub async fn pump(&self, nodes: &BTreeMap<String, Arc<BeaconNode>>) -> usize {
        let mut rounds = 0;
        loop {
            let frames = self.drain();
            if frames.is_empty() {
                return rounds;
            }
            rounds += 1;
            for (node_id, frame) in frames {
                if let Some(node) = nodes.get(&node_id) {
                    node.handle_mesh_frame(&frame).await;
                }
            }
        }
    }
}

/// One node's view of the medium
pub struct SimRadio {
    node_id: String,
    air: Arc<Air>,
}

#[async_trait]
impl MeshRadio for SimRadio {
    fn has_peers(&self) -> bool {
        !self.air.neighbours(&self.node_id).is_empty()
    }

    fn mtu(&self) -> usize {
        self.air.config.mtu
    }

    async fn broadcast(&self, frame: Bytes) -> ChannelResult<()> {
        if frame.len() > self.air.config.mtu {
            return Err(ChannelError::Rejected(format!(
                "frame of {} bytes exceeds mtu {}",
                frame.len(),
                self.air.config.mtu
            )));
        }
        if !self.has_peers() {
            return Err(ChannelError::Transport("no peers in range".into()));
        }
        self.air.transmit(&self.node_id, frame);
        Ok(())
    }
}
