use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;

use vkprobe::{DiagnosticsFilter, Error};

// When set to `ShowAll`, every validation and report message is forwarded
// instead of just the shader printf output.
const FILTER: DiagnosticsFilter = DiagnosticsFilter::PrintfOnly;

/// Reinterprets a raw byte stream as little-endian 32-bit words.
///
/// Only the size is checked; anything else that is wrong with the blob
/// surfaces later as a module-creation error.
fn words_from_bytes(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }

    Some(
        bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect(),
    )
}

fn read_words(path: &Path) -> io::Result<Vec<u32>> {
    let bytes = std::fs::read(path)?;

    words_from_bytes(&bytes).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: not a whole number of 32-bit words", path.display()),
        )
    })
}

pub fn main() {
    env_logger::init();

    let mut paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        // One program per shader source language, compiled offline.
        paths = vec![
            PathBuf::from("GLSLComputeShader.comp.spv"),
            PathBuf::from("HLSLComputeShader.comp.spv"),
        ];
    }

    let mut programs = Vec::with_capacity(paths.len());
    for path in &paths {
        match read_words(path) {
            Ok(words) => programs.push(words),
            Err(err) => {
                eprintln!("failed to read {}: {}", path.display(), err);
                exit(2);
            }
        }
    }

    match vkprobe::harness::run(&programs, FILTER) {
        Ok(()) => {}
        Err(err @ Error::MissingCapabilities) => {
            eprintln!("{}", err);
            exit(1);
        }
        Err(err) => {
            eprintln!("{}", err);
            exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_little_endian() {
        let words = words_from_bytes(&[0x03, 0x02, 0x23, 0x07]).unwrap();
        assert_eq!(words, vec![0x0723_0203]);
    }

    #[test]
    fn empty_stream_is_zero_words() {
        assert_eq!(words_from_bytes(&[]).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn partial_word_is_rejected() {
        assert!(words_from_bytes(&[1, 2, 3]).is_none());
    }
}
