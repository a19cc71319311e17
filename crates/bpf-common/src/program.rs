//! [`Program`] is a wrapper around [`aya::Ebpf`] which:
//! - loads an enforcement probe and lets the caller populate its rule
//!   tables *before* the interception point is attached
//! - reads termination records from the probe's perf event array
//! - detaches everything on drop, with background readers stopping first
use core::fmt;
use std::{collections::HashSet, convert::TryFrom, fmt::Display, mem::size_of, sync::Arc};

use aya::{
    Btf, BtfError, Ebpf, EbpfLoader, Pod,
    maps::{
        Map,
        perf::{AsyncPerfEventArray, PerfBufferError},
    },
    programs::KProbe,
    util::online_cpus,
};
use bytes::BytesMut;
use thiserror::Error;
use tokio::{sync::watch, task::JoinError};

use crate::BpfSender;

const PERF_HEADER_SIZE: usize = 4;

pub const PERF_PAGES_DEFAULT: usize = 4096;

/// BpfContext contains extra settings which could be provided on program load
#[derive(Clone)]
pub struct BpfContext {
    /// Btf allows to load it only once on startup
    btf: Arc<Btf>,
    /// How many pages of memory (4Kb) to use for perf arrays.
    /// NOTE: this will result in a memory usage of:
    /// (number of filters) * (number of cores) * (perf_pages) * 4Kb
    perf_pages: usize,
}

impl BpfContext {
    pub fn new(mut perf_pages: usize) -> Result<Self, ProgramError> {
        let btf = Btf::from_sys_fs()?;
        if perf_pages == 0 || (perf_pages & (perf_pages - 1) != 0) {
            log::warn!("Invalid value ({perf_pages}) for perf_pages, which must be a power of 2.");
            log::warn!("The default value {PERF_PAGES_DEFAULT} will be used.");
            perf_pages = PERF_PAGES_DEFAULT;
        }

        Ok(Self {
            btf: Arc::new(btf),
            perf_pages,
        })
    }
}

/// Return the eBPF binary of the given probe, embedded at build time.
#[macro_export]
macro_rules! ebpf_program {
    ($probe: expr) => {{
        use bpf_common::aya::include_bytes_aligned;

        include_bytes_aligned!(concat!(env!("OUT_DIR"), "/", $probe, ".bpf.o")).to_vec()
    }};
}

#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("loading probe")]
    LoadingProbe(#[from] aya::EbpfError),
    #[error("program not found {0}")]
    ProgramNotFound(String),
    #[error("incorrect program type {0}")]
    ProgramTypeError(String),
    #[error("failed program load {program}")]
    ProgramLoadError {
        program: String,
        #[source]
        program_error: Box<aya::programs::ProgramError>,
    },
    #[error("failed program attach {program}")]
    ProgramAttachError {
        program: String,
        #[source]
        program_error: Box<aya::programs::ProgramError>,
    },
    #[error(transparent)]
    MapError(#[from] aya::maps::MapError),
    #[error("map not found {0}")]
    MapNotFound(String),
    #[error("map already used {0}")]
    MapAlreadyUsed(String),
    #[error("perf buffer error {0}")]
    PerfBuffer(#[from] PerfBufferError),
    #[error("loading BTF {0}")]
    BtfError(#[from] BtfError),
    #[error("running background aya task {0}")]
    JoinError(#[from] JoinError),
    #[error("listing online CPUs")]
    OnlineCpus(#[source] std::io::Error),
}

pub struct ProgramBuilder {
    /// probe name, used for logging purposes
    name: &'static str,
    /// Probe configuration
    ctx: BpfContext,
    probe: Vec<u8>,
    kprobes: Vec<String>,
}

impl ProgramBuilder {
    pub fn new(ctx: BpfContext, name: &'static str, probe: Vec<u8>) -> Self {
        Self {
            ctx,
            name,
            probe,
            kprobes: Vec::new(),
        }
    }

    pub fn kprobe(mut self, name: &str) -> Self {
        self.kprobes.push(name.to_string());
        self
    }

    /// Load the probe, run `setup` to populate its rule tables, then attach
    /// the interception points. The ordering is the write-before-activate
    /// discipline: by the time the first event is intercepted the tables
    /// are complete and will never be written again.
    pub async fn start<F>(self, setup: F) -> Result<Program, ProgramError>
    where
        F: FnOnce(&mut Ebpf) -> Result<(), ProgramError> + Send + 'static,
    {
        // We need to notify background tasks reading from maps that we're
        // shutting down. We use a watch channel because we can't clone the
        // perf readers' exit condition out of a oneshot, and dropping
        // aya::Ebpf alone would not error the open map file descriptors.
        let (tx_exit, _) = watch::channel(());
        let btf = self.ctx.btf.clone();
        let ctx = self.ctx.clone();
        let name = self.name.to_string();

        let bpf = tokio::task::spawn_blocking(move || {
            let mut bpf = EbpfLoader::new()
                .btf(Some(btf.as_ref()))
                .load(&self.probe)?;
            setup(&mut bpf)?;
            for kprobe in &self.kprobes {
                attach_kprobe(&mut bpf, kprobe)?;
            }
            Result::<Ebpf, ProgramError>::Ok(bpf)
        })
        .await??;

        Ok(Program {
            tx_exit,
            name,
            ctx,
            bpf,
            used_maps: Default::default(),
        })
    }
}

fn attach_kprobe(bpf: &mut Ebpf, kprobe: &str) -> Result<(), ProgramError> {
    let program: &mut KProbe = bpf
        .program_mut(kprobe)
        .ok_or_else(|| ProgramError::ProgramNotFound(kprobe.to_string()))?
        .try_into()
        .map_err(|_err| ProgramError::ProgramTypeError(kprobe.to_string()))?;
    program.load().map_err(|program_error| ProgramError::ProgramLoadError {
        program: kprobe.to_string(),
        program_error: Box::new(program_error),
    })?;
    program
        .attach(kprobe, 0)
        .map_err(|program_error| ProgramError::ProgramAttachError {
            program: kprobe.to_string(),
            program_error: Box::new(program_error),
        })?;
    Ok(())
}

pub struct Program {
    /// Signal to the background perf readers that we're exiting.
    tx_exit: watch::Sender<()>,
    ctx: BpfContext,
    name: String,
    bpf: Ebpf,
    used_maps: HashSet<String>,
}

impl Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Program {
    pub fn bpf(&mut self) -> &mut Ebpf {
        &mut self.bpf
    }

    /// Watch a BPF_MAP_TYPE_PERF_EVENT_ARRAY of fixed-size records and
    /// forward everything to `sender`. A different task is run for each CPU.
    /// All tasks stop when the [`Program`] is dropped.
    pub async fn read_events<T: Pod + Send>(
        &mut self,
        map_name: &str,
        sender: impl BpfSender<T>,
    ) -> Result<(), ProgramError> {
        let map_resource = self.take_map(map_name)?;

        let mut perf_array: AsyncPerfEventArray<_> = AsyncPerfEventArray::try_from(map_resource)?;
        let buffers = online_cpus()
            .map_err(|(_, error)| ProgramError::OnlineCpus(error))?
            .into_iter()
            .map(|cpu_id| perf_array.open(cpu_id, Some(self.ctx.perf_pages)))
            .collect::<Result<Vec<_>, PerfBufferError>>()?;
        for mut buf in buffers {
            let name = self.name.clone();
            let mut sender = sender.clone();
            let mut rx_exit = self.tx_exit.subscribe();
            let event_size: usize = size_of::<T>();
            let buffer_size: usize = event_size + PERF_HEADER_SIZE;
            tokio::spawn(async move {
                let mut buffers = (0..10)
                    .map(|_| BytesMut::with_capacity(buffer_size))
                    .collect::<Vec<_>>();
                loop {
                    let events = tokio::select! {
                        Err(_) = rx_exit.changed() => return,
                        events = buf.read_events(&mut buffers) => events,
                    };
                    match events {
                        Ok(events) => {
                            if events.lost > 0 {
                                log::warn!(
                                    "{}: Lost {} events (read {})",
                                    name,
                                    events.lost,
                                    events.read
                                );
                            }
                            for buffer in buffers.iter_mut().take(events.read) {
                                if buffer.len() < event_size {
                                    log::error!(
                                        "{}: short read: {} bytes, expected {}",
                                        name,
                                        buffer.len(),
                                        event_size
                                    );
                                    continue;
                                }
                                let ptr = buffer.as_ptr() as *const T;
                                let record = unsafe { ptr.read_unaligned() };
                                sender.send(Ok(record));
                            }
                        }
                        Err(e) => return sender.send(Err(e.into())),
                    };
                }
            });
        }

        Ok(())
    }

    fn take_map(&mut self, map_name: &str) -> Result<Map, ProgramError> {
        if self.used_maps.contains(map_name) {
            return Err(ProgramError::MapAlreadyUsed(map_name.to_string()));
        };

        let map_resource = self
            .bpf
            .take_map(map_name)
            .ok_or_else(|| ProgramError::MapNotFound(map_name.to_string()))?;

        self.used_maps.insert(map_name.to_string());
        Ok(map_resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_task_failures_surface_as_program_errors() {
        // A crashed load task must come back as an error, not a panic of
        // the caller.
        let join_error = tokio::task::spawn_blocking(|| panic!("probe load crashed"))
            .await
            .unwrap_err();
        let err = ProgramError::from(join_error);
        assert!(matches!(err, ProgramError::JoinError(_)));
    }
}
