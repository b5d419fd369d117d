use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "Build and inspect ext2 images")]
pub struct Cli {
    /// Image file
    #[arg(long, short)]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new file system, overwriting the image
    Mkfs(MkfsArgs),

    #[command(flatten)]
    Fs(FsCommand),
}

#[derive(Args)]
pub struct MkfsArgs {
    /// Image size in MiB
    #[arg(long, short, default_value_t = 64)]
    pub size: u64,

    #[arg(long, short, default_value_t = 1024)]
    pub block_size: u32,

    /// Use 64-byte group descriptors
    #[arg(long)]
    pub bit64: bool,

    #[arg(long, short = 'L', default_value = "")]
    pub label: String,
}

/// 需要挂载已有镜像的命令
#[derive(Subcommand)]
pub enum FsCommand {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a file to stdout
    Cat { path: String },

    /// Copy a host file into the image
    Put { host: PathBuf, path: String },

    Mkdir { path: String },

    /// Remove a file or an empty directory
    Rm { path: String },

    Mv { from: String, to: String },

    /// Make a hard link, or a symbolic link with `-s`
    Ln {
        #[arg(short)]
        symbolic: bool,
        target: String,
        path: String,
    },

    Stat { path: String },
}
