mod common;

use ext2::{OpenFlag, ROOT_INO, VnodeKind};
use vfs::{DirEntry, DirEntryType, Error};

use common::{fresh, names};

fn touch(dir: &ext2::Vnode, name: &str) -> ext2::Vnode {
    dir.open(name, OpenFlag::Create.into(), 0o644).unwrap()
}

#[test]
fn tombstone_is_reused_in_place() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    for name in ["a", "b", "c"] {
        touch(&root, name);
    }
    let size = root.stat().unwrap().size;

    root.unlink("b").unwrap();
    assert_eq!(vec![".", "..", "a", "c"], names(&root));
    touch(&root, "d");
    assert_eq!(vec![".", "..", "a", "d", "c"], names(&root));
    assert_eq!(size, root.stat().unwrap().size);
}

#[test]
fn directory_size_stays_put_across_churn() {
    let (_dev, fs) = fresh(8);
    let root = fs.root_dir().unwrap();
    let dir = root.mkdir("churn", 0o755).unwrap();

    let name = |i: usize| format!("{i:0>40}");
    for i in 0..100 {
        touch(&dir, &name(i));
    }
    let size = dir.stat().unwrap().size;
    assert!(size > 1024);

    for round in 0..3 {
        for i in 0..100 {
            dir.unlink(&name(i)).unwrap();
        }
        assert_eq!(vec![".", ".."], names(&dir));
        for i in 0..100 {
            touch(&dir, &name(i));
        }
        assert_eq!(size, dir.stat().unwrap().size, "round {round}");
    }
    assert_eq!(102, names(&dir).len());
}

#[test]
fn lookup_finds_entries_in_later_blocks() {
    let (_dev, fs) = fresh(8);
    let root = fs.root_dir().unwrap();
    let mut inos = Vec::new();
    for i in 0..200 {
        inos.push(touch(&root, &format!("entry-{i}")).ino());
    }
    for (i, ino) in inos.into_iter().enumerate() {
        assert_eq!(ino, root.lookup(&format!("entry-{i}")).unwrap().ino());
    }
    assert_eq!(Err(Error::NotFound), root.lookup("entry-200").map(drop));
}

#[test]
fn bad_names_are_rejected() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let long = "x".repeat(256);

    assert_eq!(Err(Error::NotFound), root.lookup("").map(drop));
    assert_eq!(Err(Error::NameTooLong), root.lookup(&long).map(drop));
    assert_eq!(Err(Error::InvalidArgument), root.lookup("a/b").map(drop));
    assert_eq!(Err(Error::NameTooLong), root.mkdir(&long, 0o755).map(drop));

    let max = "y".repeat(255);
    touch(&root, &max);
    assert_eq!(max.as_str(), root.entries().unwrap()[2].name);
}

#[test]
fn mkdir_and_rmdir() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    assert_eq!(2, root.stat().unwrap().links);

    let sub = root.mkdir("sub", 0o750).unwrap();
    assert_eq!(VnodeKind::Directory, sub.kind());
    assert_eq!(3, root.stat().unwrap().links);
    let stat = sub.stat().unwrap();
    assert_eq!((2, 0o750, 1024), (stat.links, stat.perm, stat.size));

    let entries = sub.entries().unwrap();
    assert_eq!(2, entries.len());
    assert_eq!(
        (sub.ino() as u64, DirEntryType::Directory),
        (entries[0].inode, entries[0].ty)
    );
    assert_eq!(ROOT_INO as u64, entries[1].inode);
    assert_eq!(ROOT_INO, sub.lookup("..").unwrap().ino());
    assert_eq!(Err(Error::AlreadyExists), root.mkdir("sub", 0o755).map(drop));

    touch(&sub, "file");
    assert_eq!(Err(Error::DirectoryNotEmpty), root.rmdir("sub"));
    sub.unlink("file").unwrap();

    let free = (fs.free_blocks(), fs.free_inodes());
    let ino = sub.ino();
    root.rmdir("sub").unwrap();
    assert_eq!(2, root.stat().unwrap().links);
    assert_eq!(0, sub.stat().unwrap().links);
    assert_eq!(Err(Error::NotFound), touch_err(&sub, "late"));

    drop(sub);
    assert_eq!(0, fs.vnode_refs(ino));
    assert_eq!((free.0 + 1, free.1 + 1), (fs.free_blocks(), fs.free_inodes()));
}

fn touch_err(dir: &ext2::Vnode, name: &str) -> Result<(), Error> {
    dir.open(name, OpenFlag::Create.into(), 0o644).map(drop)
}

#[test]
fn rmdir_and_unlink_check_types() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    touch(&root, "file");
    root.mkdir("dir", 0o755).unwrap();

    assert_eq!(Err(Error::NotADirectory), root.rmdir("file"));
    assert_eq!(Err(Error::NotFound), root.rmdir("nothing"));
    assert_eq!(Err(Error::InvalidArgument), root.unlink("."));
    assert_eq!(Err(Error::InvalidArgument), root.rmdir(".."));
    // 空目录也可以经由 unlink 删除
    root.unlink("dir").unwrap();
    assert_eq!(vec![".", "..", "file"], names(&root));
}

#[test]
fn getdents_matches_entries() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    touch(&root, "regular");
    root.mkdir("dir", 0o755).unwrap();
    root.symlink("link", "regular").unwrap();

    let parsed = DirEntry::parse_all(&root.getdents().unwrap());
    assert_eq!(root.entries().unwrap(), parsed);
    let types: Vec<_> = parsed.iter().map(|e| e.ty).collect();
    assert_eq!(
        vec![
            DirEntryType::Directory,
            DirEntryType::Directory,
            DirEntryType::Regular,
            DirEntryType::Directory,
            DirEntryType::SymLink,
        ],
        types
    );
}

#[test]
fn rename_within_directory() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let ino = touch(&root, "old").ino();

    root.rename("old", &root, "new").unwrap();
    assert_eq!(vec![".", "..", "new"], names(&root));
    assert_eq!(ino, root.lookup("new").unwrap().ino());
    assert_eq!(1, root.lookup("new").unwrap().stat().unwrap().links);

    // 同名改名什么也不做
    root.rename("new", &root, "new").unwrap();
    assert_eq!(Err(Error::NotFound), root.rename("old", &root, "x"));
}

#[test]
fn rename_replaces_file() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let src = touch(&root, "src");
    src.pwrite(b"source", 0).unwrap();
    let victim = touch(&root, "dst");
    let victim_ino = victim.ino();
    drop(victim);
    let inodes = fs.free_inodes();

    root.rename("src", &root, "dst").unwrap();
    assert_eq!(vec![".", "..", "dst"], names(&root));
    assert_eq!(src.ino(), root.lookup("dst").unwrap().ino());
    assert_eq!(inodes + 1, fs.free_inodes());
    assert_eq!(0, fs.vnode_refs(victim_ino));
}

#[test]
fn rename_type_mismatch_changes_nothing() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    root.mkdir("dir", 0o755).unwrap();
    touch(&root, "file");
    let full = root.mkdir("full", 0o755).unwrap();
    touch(&full, "inside");
    let before = root.entries().unwrap();

    assert_eq!(Err(Error::NotADirectory), root.rename("dir", &root, "file"));
    assert_eq!(Err(Error::IsADirectory), root.rename("file", &root, "dir"));
    assert_eq!(Err(Error::DirectoryNotEmpty), root.rename("dir", &root, "full"));
    assert_eq!(before, root.entries().unwrap());
    assert_eq!(4, root.stat().unwrap().links);
}

#[test]
fn rename_moves_directory_between_parents() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let a = root.mkdir("a", 0o755).unwrap();
    let b = root.mkdir("b", 0o755).unwrap();
    let moved = a.mkdir("moved", 0o755).unwrap();
    assert_eq!((3, 2), (a.stat().unwrap().links, b.stat().unwrap().links));

    a.rename("moved", &b, "here").unwrap();
    assert_eq!(vec![".", ".."], names(&a));
    assert_eq!(vec![".", "..", "here"], names(&b));
    assert_eq!((2, 3), (a.stat().unwrap().links, b.stat().unwrap().links));
    assert_eq!(b.ino(), moved.lookup("..").unwrap().ino());
    assert_eq!(2, moved.stat().unwrap().links);
}

#[test]
fn directory_cannot_move_beneath_itself() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let top = root.mkdir("top", 0o755).unwrap();
    let mid = top.mkdir("mid", 0o755).unwrap();
    let low = mid.mkdir("low", 0o755).unwrap();

    assert_eq!(Err(Error::InvalidArgument), root.rename("top", &low, "loop"));
    assert_eq!(Err(Error::InvalidArgument), root.rename("top", &top, "self"));
    assert_eq!(vec![".", "..", "top"], names(&root));
    assert_eq!(Err(Error::InvalidArgument), root.rename(".", &top, "x"));

    // 向上移动是允许的
    mid.rename("low", &root, "low").unwrap();
    assert_eq!(ROOT_INO, low.lookup("..").unwrap().ino());
}

#[test]
fn hard_links_share_inode() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let sub = root.mkdir("sub", 0o755).unwrap();
    let file = touch(&root, "file");
    file.pwrite(b"shared", 0).unwrap();

    sub.link("alias", &file).unwrap();
    assert_eq!(2, file.stat().unwrap().links);
    assert_eq!(Err(Error::AlreadyExists), sub.link("alias", &file));
    assert_eq!(Err(Error::PermissionDenied), root.link("d", &sub));

    root.unlink("file").unwrap();
    assert_eq!(1, file.stat().unwrap().links);
    let alias = sub.lookup("alias").unwrap();
    let mut buf = [0; 6];
    alias.pread(&mut buf, 0).unwrap();
    assert_eq!(b"shared", &buf);
}

#[test]
fn unlinked_open_file_lives_until_last_handle() {
    let (_dev, fs) = fresh(4);
    let root = fs.root_dir().unwrap();
    let free = (fs.free_blocks(), fs.free_inodes());

    let file = touch(&root, "doomed");
    file.pwrite(&[7; 5000], 0).unwrap();
    let ino = file.ino();
    let other = file.clone();
    assert_eq!(2, fs.vnode_refs(ino));

    root.unlink("doomed").unwrap();
    assert_eq!(0, file.stat().unwrap().links);
    let mut buf = [0; 4];
    assert_eq!(4, other.pread(&mut buf, 4000).unwrap());
    assert_eq!([7; 4], buf);

    drop(file);
    assert_eq!(1, fs.vnode_refs(ino));
    assert!(fs.free_inodes() < free.1);
    drop(other);
    assert_eq!(0, fs.vnode_refs(ino));
    assert_eq!(free, (fs.free_blocks(), fs.free_inodes()));
    assert_eq!(Err(Error::Io), fs.vnode(ino).map(drop));
}
