use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const BLOCK_SIZE: u64 = 8192;

/// Lines of a file from last to first, read in fixed-size blocks from the
/// end so only one partial line is ever buffered beyond the current block.
///
/// Bytes are decoded lossily, a trailing `\r` is stripped and empty lines
/// are skipped.
pub struct ReverseLines<R> {
    reader: R,
    /// Bytes not yet read, counted from the start of the file.
    remaining: u64,
    /// Incomplete line at the front of what has been read so far.
    carry: Vec<u8>,
    /// Complete lines from the current block, in file order.
    ready: Vec<String>,
    block_size: u64,
}

impl ReverseLines<File> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> ReverseLines<R> {
    pub fn new(reader: R) -> io::Result<Self> {
        Self::with_block_size(reader, BLOCK_SIZE)
    }

    pub fn with_block_size(mut reader: R, block_size: u64) -> io::Result<Self> {
        let remaining = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            remaining,
            carry: Vec::new(),
            ready: Vec::new(),
            block_size: block_size.max(1),
        })
    }

    fn read_block(&mut self) -> io::Result<()> {
        let size = self.block_size.min(self.remaining);
        self.remaining -= size;
        self.reader.seek(SeekFrom::Start(self.remaining))?;
        let mut block = vec![0; size as usize];
        self.reader.read_exact(&mut block)?;
        block.append(&mut self.carry);

        let mut pieces = block.split(|&b| b == b'\n');
        // The first piece may continue into the previous block.
        self.carry = pieces.next().map(<[u8]>::to_vec).unwrap_or_default();
        self.ready = pieces.filter(|l| !l.is_empty()).map(decode).collect();
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for ReverseLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.ready.pop() {
                if line.is_empty() {
                    continue;
                }
                return Some(Ok(line));
            }
            if self.remaining == 0 {
                if self.carry.is_empty() {
                    return None;
                }
                let line = decode(&std::mem::take(&mut self.carry));
                if line.is_empty() {
                    return None;
                }
                return Some(Ok(line));
            }
            if let Err(e) = self.read_block() {
                self.remaining = 0;
                self.carry.clear();
                return Some(Err(e));
            }
        }
    }
}

fn decode(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}
