mod block_file;
mod cli;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use block_dev::BlockDevice;
use clap::Parser;
use enumflags2::BitFlags;
use ext2::{Ext2FileSystem, FormatOptions, OpenFlag, Vnode, VnodeKind};
use typed_bytesize::ByteSizeIec;
use vfs::{Clock, DirEntryType, Timespec};

pub use self::{
    block_file::BlockFile,
    cli::{Cli, Command, FsCommand, MkfsArgs},
};

struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timespec {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timespec::new(elapsed.as_secs() as i64, elapsed.subsec_nanos())
    }
}

fn fs_error(err: vfs::Error) -> io::Error {
    io::Error::from_raw_os_error(err.errno() as i32)
}

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Mkfs(args) => mkfs(&cli.image, args),
        Command::Fs(command) => {
            let fd = OpenOptions::new().read(true).write(true).open(&cli.image)?;
            let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd));
            let fs = Ext2FileSystem::initialize(block_dev, Arc::new(SystemClock), "/", BitFlags::empty())
                .map_err(fs_error)?;

            run(&fs, command).map_err(fs_error)?;
            fs.on_unmount().map_err(fs_error)
        }
    }
}

fn mkfs(image: &Path, args: MkfsArgs) -> io::Result<()> {
    let MkfsArgs {
        size,
        block_size,
        bit64,
        label,
    } = args;
    let disk_size = ByteSizeIec::mib(size).0;
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(image)?;
    fd.set_len(disk_size)?;

    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::new(fd));
    let opts = FormatOptions {
        size: disk_size,
        block_size,
        bit64,
        volume_name: label,
        time: SystemClock.now(),
        ..Default::default()
    };
    Ext2FileSystem::format(block_dev, &opts).map_err(fs_error)?;
    println!("image={image:?} size={size}MiB block_size={block_size}");
    Ok(())
}

fn run(fs: &Arc<Ext2FileSystem>, command: FsCommand) -> Result<(), vfs::Error> {
    let root = fs.root_dir()?;

    match command {
        FsCommand::Ls { path } => {
            let dir = resolve(&root, &path)?;
            for entry in dir.entries()? {
                let marker = match entry.ty {
                    DirEntryType::Directory => "/",
                    DirEntryType::SymLink => "@",
                    _ => "",
                };
                println!("{:>8} {}{marker}", entry.inode, entry.name);
            }
        }
        FsCommand::Cat { path } => {
            let file = resolve(&root, &path)?;
            let mut buf = vec![0u8; 64 * 1024];
            let mut offset = 0;
            let mut stdout = io::stdout().lock();
            loop {
                let len = file.pread(&mut buf, offset)?;
                if len == 0 {
                    break;
                }
                stdout.write_all(&buf[..len]).map_err(|_| vfs::Error::Io)?;
                offset += len as u64;
            }
        }
        FsCommand::Put { host, path } => {
            let data = fs::read(&host).map_err(|err| {
                log::error!("reading {host:?}: {err}");
                vfs::Error::Io
            })?;
            let (parent, name) = resolve_parent(&root, &path)?;
            let file = parent.open(name, OpenFlag::Create | OpenFlag::Truncate, 0o644)?;
            file.pwrite(&data, 0)?;
            log::info!("put {host:?} -> {path} ({} bytes)", data.len());
        }
        FsCommand::Mkdir { path } => {
            let (parent, name) = resolve_parent(&root, &path)?;
            parent.mkdir(name, 0o755)?;
        }
        FsCommand::Rm { path } => {
            let (parent, name) = resolve_parent(&root, &path)?;
            parent.unlink(name)?;
        }
        FsCommand::Mv { from, to } => {
            let (old_dir, old_name) = resolve_parent(&root, &from)?;
            let (new_dir, new_name) = resolve_parent(&root, &to)?;
            old_dir.rename(old_name, &new_dir, new_name)?;
        }
        FsCommand::Ln {
            symbolic,
            target,
            path,
        } => {
            let (parent, name) = resolve_parent(&root, &path)?;
            if symbolic {
                parent.symlink(name, &target)?;
            } else {
                let target = resolve(&root, &target)?;
                parent.link(name, &target)?;
            }
        }
        FsCommand::Stat { path } => {
            let stat = resolve(&root, &path)?.stat()?;
            println!("{path}: {stat:#?}");
        }
    }

    fs.sync(BitFlags::all())
}

/// 从根目录出发逐级查找，不跟随符号链接
fn resolve(root: &Vnode, path: &str) -> Result<Vnode, vfs::Error> {
    let mut node = root.clone();
    for name in path.split('/').filter(|name| !name.is_empty()) {
        if node.kind() != VnodeKind::Directory {
            return Err(vfs::Error::NotADirectory);
        }
        node = node.lookup(name)?;
    }
    Ok(node)
}

/// 拆成父目录与最后一级名字
fn resolve_parent<'a>(root: &Vnode, path: &'a str) -> Result<(Vnode, &'a str), vfs::Error> {
    let path = path.trim_end_matches('/');
    let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
    Ok((resolve(root, parent)?, name))
}
