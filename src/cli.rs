//! clap-based command line interface.
//!
//! Defines the [`Cli`] struct with subcommands [`Command`]
//! (create, setup, run, status, logs, package) and global flags
//! (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::paths::LogKind;
use crate::state_machine::{ContainerImage, InstanceType, JobId};

/// hemeflow — lifecycle orchestrator for hemodynamic simulation jobs.
#[derive(Debug, Parser)]
#[command(name = "hemeflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file (defaults to ./hemeflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Worker node size accepted by the CLI, mapped to
/// [`InstanceType`](crate::state_machine::InstanceType) internally.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum InstanceTypeArg {
    /// 2 cores per node.
    Cores2,
    /// 4 cores per node.
    Cores4,
    /// 8 cores per node.
    Cores8,
    /// 16 cores per node.
    Cores16,
}

impl From<InstanceTypeArg> for InstanceType {
    fn from(arg: InstanceTypeArg) -> Self {
        match arg {
            InstanceTypeArg::Cores2 => InstanceType::Cores2,
            InstanceTypeArg::Cores4 => InstanceType::Cores4,
            InstanceTypeArg::Cores8 => InstanceType::Cores8,
            InstanceTypeArg::Cores16 => InstanceType::Cores16,
        }
    }
}

/// Solver container image version.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ContainerImageArg {
    #[value(name = "0.0.2")]
    V002,
    #[value(name = "0.0.3")]
    V003,
}

impl From<ContainerImageArg> for ContainerImage {
    fn from(arg: ContainerImageArg) -> Self {
        match arg {
            ContainerImageArg::V002 => ContainerImage::HemelbCore002,
            ContainerImageArg::V003 => ContainerImage::HemelbCore003,
        }
    }
}

/// Which of the job's log files to fetch.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogKindArg {
    Stdout,
    Stderr,
    /// The execution engine's own log.
    Engine,
}

impl From<LogKindArg> for LogKind {
    fn from(arg: LogKindArg) -> Self {
        match arg {
            LogKindArg::Stdout => LogKind::Stdout,
            LogKindArg::Stderr => LogKind::Stderr,
            LogKindArg::Engine => LogKind::Engine,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a new job from a geometry and a profile file.
    Create {
        /// Geometry file (.stl).
        stl: PathBuf,

        /// Profile file (.pr2).
        profile: PathBuf,

        /// Worker node size.
        #[arg(long, value_enum, default_value = "cores2")]
        instance_type: InstanceTypeArg,

        /// Number of worker nodes (1..=36).
        #[arg(long, default_value_t = 1)]
        instance_count: u32,

        /// Solver container image version.
        #[arg(long, value_enum, default_value = "0.0.2")]
        image: ContainerImageArg,
    },

    /// Convert the job's geometry and profile into solver inputs.
    Setup {
        id: JobId,

        /// Run synchronously instead of through the worker pool.
        #[arg(long)]
        inline: bool,
    },

    /// Provision compute, execute the solver and convert its output.
    Run {
        id: JobId,

        /// Run synchronously instead of through the worker pool.
        #[arg(long)]
        inline: bool,
    },

    /// Show one job, or list all jobs when no id is given.
    Status { id: Option<JobId> },

    /// Fetch one of the job's log files.
    Logs {
        id: JobId,

        #[arg(long, value_enum, default_value = "stdout")]
        kind: LogKindArg,
    },

    /// Package the job's result directory into a tar.gz archive.
    Package { id: JobId },
}
