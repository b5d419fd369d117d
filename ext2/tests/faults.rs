mod common;

use std::sync::Arc;

use block_dev::{FaultyDisk, RamDisk};
use enumflags2::BitFlags;
use ext2::{Ext2FileSystem, OpenFlag, Vnode};
use vfs::Error;

use common::{fresh_faulty, mount_dev};

const BS: u64 = 1024;

fn create(dir: &Vnode, name: &str) -> Vnode {
    dir.open(name, OpenFlag::Create | OpenFlag::Exclusive, 0o644)
        .unwrap()
}

#[test]
fn device_errors_stop_the_operation() {
    let (dev, fs) = fresh_faulty(2);
    let root = fs.root_dir().unwrap();
    let file = create(&root, "f");
    file.pwrite(b"hello", 0).unwrap();
    let free = (fs.free_blocks(), fs.free_inodes());

    dev.fail_writes_after(0);
    assert_eq!(Err(Error::Io), file.pwrite(b"HELLO", 0));
    assert_eq!(Err(Error::Io), root.mkdir("d", 0o755).map(|_| ()));
    assert_eq!(free, (fs.free_blocks(), fs.free_inodes()));

    dev.heal();
    dev.fail_reads_after(0);
    let mut buf = [0u8; 5];
    assert_eq!(Err(Error::Io), file.pread(&mut buf, 0));

    dev.heal();
    assert_eq!(Ok(5), file.pread(&mut buf, 0));
    assert_eq!(b"hello", &buf);
    assert_eq!(Err(Error::NotFound), root.lookup("d").map(|_| ()));
}

/// 只剩一个空闲块的文件系统，外加一个空文件
fn one_block_left() -> (Arc<FaultyDisk<RamDisk>>, Arc<Ext2FileSystem>, Vnode) {
    let (dev, fs) = fresh_faulty(2);
    let root = fs.root_dir().unwrap();
    let victim = create(&root, "victim");
    let extra = create(&root, "extra");
    let block = [0x5a; BS as usize];
    create(&root, "spare").pwrite(&block, 0).unwrap();

    let fill = create(&root, "fill");
    let mut offset = 0;
    loop {
        match fill.pwrite(&block, offset) {
            Ok(_) => offset += BS,
            Err(err) => {
                assert_eq!(Error::NoSpace, err);
                break;
            }
        }
    }
    // 间接块放不下时剩下的零头用直接块吃掉
    let mut offset = 0;
    while fs.free_blocks() > 0 {
        extra.pwrite(&block, offset).unwrap();
        offset += BS;
    }

    root.unlink("spare").unwrap();
    assert_eq!(1, fs.free_blocks());
    (dev, fs, victim)
}

#[test]
fn failed_rollback_reports_io_and_keeps_counts() {
    // 先量出拿到最后一块要写几次
    let (dev, _fs, victim) = one_block_left();
    let before = dev.writes();
    victim.ftruncate(BS).unwrap();
    let budget = dev.writes() - before;

    // 第二块分配不到，回滚时归还第一块的写入失败
    let (dev, fs, victim) = one_block_left();
    dev.fail_writes_after(budget);
    assert_eq!(Err(Error::Io), victim.ftruncate(2 * BS));
    dev.heal();

    let stat = victim.stat().unwrap();
    assert_eq!((0, BS / 512), (stat.size, stat.blocks));
    assert_eq!(0, fs.free_blocks());

    drop(victim);
    fs.on_unmount().unwrap();
    drop(fs);

    let fs = mount_dev(dev, BitFlags::empty()).unwrap();
    assert_eq!(0, fs.free_blocks());
    let stat = fs.root_dir().unwrap().lookup("victim").unwrap().stat().unwrap();
    assert_eq!((0, BS / 512), (stat.size, stat.blocks));
}
