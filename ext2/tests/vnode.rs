mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use ext2::{OpenFlag, ROOT_INO, VnodeKind};
use vfs::{Error, Node, Timespec};

use common::{START, fresh, names, pattern};

#[test]
fn concurrent_lookups_share_one_vnode() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let ino = root.open("shared", OpenFlag::Create.into(), 0o644).unwrap().ino();
    assert_eq!(0, fs.vnode_refs(ino));

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let (root, barrier) = (root.clone(), barrier.clone());
            thread::spawn(move || {
                let vnode = root.lookup("shared").unwrap();
                barrier.wait();
                vnode
            })
        })
        .collect();
    let vnodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(2, fs.vnode_refs(ino));
    vnodes[0].pwrite(b"seen by both", 0).unwrap();
    let mut buf = [0; 12];
    vnodes[1].pread(&mut buf, 0).unwrap();
    assert_eq!(b"seen by both", &buf);

    drop(vnodes);
    assert_eq!(0, fs.vnode_refs(ino));
    assert_eq!(1, fs.vnode_refs(ROOT_INO));
}

#[test]
fn concurrent_writers_in_separate_files() {
    let (_dev, fs) = fresh(16);
    let root = fs.root_dir().unwrap();
    let free = fs.free_blocks();

    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let root = root.clone();
            thread::spawn(move || {
                let file = root
                    .open(&format!("w{i}"), OpenFlag::Create.into(), 0o644)
                    .unwrap();
                let data = pattern(100 * 1024 + i as usize, i);
                for chunk in 0..data.len().div_ceil(4096) {
                    let range = chunk * 4096..((chunk + 1) * 4096).min(data.len());
                    file.pwrite(&data[range.clone()], range.start as u64).unwrap();
                }
                data
            })
        })
        .collect();
    let written: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut used = 0;
    for (i, data) in written.iter().enumerate() {
        let file = root.lookup(&format!("w{i}")).unwrap();
        let mut back = vec![0; data.len()];
        assert_eq!(data.len(), file.pread(&mut back, 0).unwrap());
        assert_eq!(data, &back);
        used += file.stat().unwrap().blocks / 2;
    }
    assert_eq!(free - used, fs.free_blocks());
}

#[test]
fn open_flags() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();

    assert_eq!(Err(Error::NotFound), root.open("f", Default::default(), 0).map(drop));
    let file = root
        .open("f", OpenFlag::Create | OpenFlag::Exclusive, 0o640)
        .unwrap();
    assert_eq!(VnodeKind::RegularFile, file.kind());
    assert_eq!(0o640, file.stat().unwrap().perm);
    assert_eq!(
        Err(Error::AlreadyExists),
        root.open("f", OpenFlag::Create | OpenFlag::Exclusive, 0o640).map(drop)
    );

    let again = root.open("f", OpenFlag::Create.into(), 0o600).unwrap();
    assert_eq!(file.ino(), again.ino());
    assert_eq!(0o640, again.stat().unwrap().perm);

    assert_eq!(root.ino(), root.lookup(".").unwrap().ino());
    assert_eq!(ROOT_INO, root.lookup("..").unwrap().ino());
    assert_eq!(Err(Error::NotADirectory), file.lookup("x").map(drop));
}

#[test]
fn new_inode_attributes() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let file = root.open("f", OpenFlag::Create.into(), 0o7777).unwrap();
    let stat = file.stat().unwrap();

    assert_eq!(0o7777, stat.perm);
    assert_eq!((1, 0, 0, 0), (stat.links, stat.size, stat.blocks, stat.uid));
    assert_eq!(1024, stat.block_size);
    assert!(stat.ctime.sec > START);
    assert_eq!(stat.ctime, stat.mtime);
    assert_eq!(stat.ctime, stat.atime);

    // 目录的修改时间随创建前进
    let dir_mtime = root.stat().unwrap().mtime;
    assert!(dir_mtime.sec >= stat.ctime.sec);
}

#[test]
fn attribute_updates() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let file = root.open("f", OpenFlag::Create.into(), 0o644).unwrap();
    let created = file.stat().unwrap().ctime;

    file.chmod(0o100_600).unwrap();
    let stat = file.stat().unwrap();
    assert_eq!(0o600, stat.perm);
    assert!(stat.ctime > created);

    file.chown(Some(70_000), None).unwrap();
    file.chown(None, Some(5)).unwrap();
    let stat = file.stat().unwrap();
    assert_eq!((70_000, 5), (stat.uid, stat.gid));

    let atime = Timespec::new(-1_000, 0);
    let mtime = Timespec::new(1 << 33, 500);
    file.utimens(Some(atime), Some(mtime)).unwrap();
    let stat = file.stat().unwrap();
    assert_eq!((atime, mtime), (stat.atime, stat.mtime));

    file.utimens(None, Some(Timespec::new(42, 0))).unwrap();
    let stat = file.stat().unwrap();
    assert_eq!((atime, Timespec::new(42, 0)), (stat.atime, stat.mtime));
}

#[test]
fn timestamps_survive_write_back() {
    let (dev, fs) = fresh(4);
    let mtime = Timespec::new(1 << 33, 123_456_789);
    {
        let root = fs.root_dir().unwrap();
        let file = root.open("f", OpenFlag::Create.into(), 0o644).unwrap();
        file.utimens(None, Some(mtime)).unwrap();
    }
    fs.on_unmount().unwrap();
    drop(fs);

    let fs = common::mount(&dev, Default::default()).unwrap();
    let file = fs.root_dir().unwrap().lookup("f").unwrap();
    assert_eq!(mtime, file.stat().unwrap().mtime);
}

#[test]
fn fast_and_slow_symlinks() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let free = fs.free_blocks();

    let short = root.symlink("short", "/etc/hostname").unwrap();
    assert_eq!(VnodeKind::Symlink, short.kind());
    assert_eq!("/etc/hostname", short.readlink().unwrap());
    let stat = short.stat().unwrap();
    assert_eq!((13, 0, 0o777), (stat.size, stat.blocks, stat.perm));
    assert_eq!(free, fs.free_blocks());

    let target = "t/".repeat(40);
    let long = root.symlink("long", &target).unwrap();
    assert_eq!(target, long.readlink().unwrap());
    assert_eq!(2, long.stat().unwrap().blocks);
    assert_eq!(free - 1, fs.free_blocks());

    let boundary = "b".repeat(59);
    assert_eq!(0, root.symlink("59", &boundary).unwrap().stat().unwrap().blocks);
    let boundary = "b".repeat(60);
    assert_eq!(2, root.symlink("60", &boundary).unwrap().stat().unwrap().blocks);

    assert_eq!(Err(Error::NotFound), root.symlink("empty", "").map(drop));
    assert_eq!(Err(Error::NameTooLong), root.symlink("huge", &"x".repeat(1025)).map(drop));
    assert_eq!(Err(Error::AlreadyExists), root.symlink("short", "x").map(drop));

    let mut buf = [0; 4];
    assert_eq!(Err(Error::InvalidArgument), short.pread(&mut buf, 0));
    assert_eq!(Err(Error::InvalidArgument), root.readlink());
}

#[test]
fn removing_symlinks_frees_their_blocks() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let free = (fs.free_blocks(), fs.free_inodes());

    drop(root.symlink("fast", "target").unwrap());
    drop(root.symlink("slow", &"s".repeat(300)).unwrap());
    root.unlink("fast").unwrap();
    root.unlink("slow").unwrap();
    assert_eq!(free, (fs.free_blocks(), fs.free_inodes()));
}

#[test]
fn node_trait_forwards_to_vnode() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let file = root.open("f", OpenFlag::Create.into(), 0o644).unwrap();

    let node: &dyn Node = &file;
    assert_eq!(5, node.write_at(0, b"hello").unwrap());
    let mut buf = [0; 5];
    assert_eq!(5, node.read_at(0, &mut buf).unwrap());
    assert_eq!(b"hello", &buf);
    assert_eq!(5, node.stat().unwrap().size);
    node.fsync().unwrap();

    let dir: &dyn Node = &root;
    assert_eq!(3, vfs::DirEntry::parse_all(&dir.getdents().unwrap()).len());
    assert_eq!(vec![".", "..", "f"], names(&root));
}

#[test]
fn links_and_renames_stay_on_one_filesystem() {
    let (_dev_a, fs_a) = fresh(2);
    let (_dev_b, fs_b) = fresh(2);
    let root_a = fs_a.root_dir().unwrap();
    let root_b = fs_b.root_dir().unwrap();

    let file = root_a.open("f", OpenFlag::Create.into(), 0o644).unwrap();
    assert_eq!(Err(Error::CrossDevice), root_b.link("f", &file));
    assert_eq!(Err(Error::CrossDevice), root_a.rename("f", &root_b, "f"));

    assert_eq!(file.ino(), root_a.lookup("f").unwrap().ino());
    assert_eq!(Err(Error::NotFound), root_b.lookup("f").map(|_| ()));
    assert_eq!(1, file.stat().unwrap().links);
}
