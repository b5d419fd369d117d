use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use block_dev::{BlockDevice, DeviceError, SyncFlag};
use enumflags2::BitFlags;

/// 以宿主机上的镜像文件充当块设备
#[derive(Debug)]
pub struct BlockFile(Mutex<File>);

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self(Mutex::new(fd))
    }
}

impl BlockDevice for BlockFile {
    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError> {
        let mut file = self.0.lock().map_err(|_| DeviceError::Io)?;
        let len = file.metadata().map_err(|_| DeviceError::Io)?.len();
        if offset.saturating_add(buf.len() as u64) > len {
            return Err(DeviceError::OutOfRange);
        }

        file.seek(SeekFrom::Start(offset)).map_err(|_| DeviceError::Io)?;
        file.read_exact(buf).map_err(|err| {
            log::error!("reading {} bytes at {offset}: {err}", buf.len());
            DeviceError::Io
        })?;
        Ok(buf.len())
    }

    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize, DeviceError> {
        let mut file = self.0.lock().map_err(|_| DeviceError::Io)?;
        let len = file.metadata().map_err(|_| DeviceError::Io)?.len();
        if offset.saturating_add(buf.len() as u64) > len {
            return Err(DeviceError::OutOfRange);
        }

        file.seek(SeekFrom::Start(offset)).map_err(|_| DeviceError::Io)?;
        file.write_all(buf).map_err(|err| {
            log::error!("writing {} bytes at {offset}: {err}", buf.len());
            DeviceError::Io
        })?;
        Ok(buf.len())
    }

    fn sync(&self, flags: BitFlags<SyncFlag>) -> Result<(), DeviceError> {
        let file = self.0.lock().map_err(|_| DeviceError::Io)?;
        let res = if flags.contains(SyncFlag::Metadata) {
            file.sync_all()
        } else {
            file.sync_data()
        };
        res.map_err(|_| DeviceError::Io)
    }
}
