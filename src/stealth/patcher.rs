//! Chrome binary marker patching
//!
//! Some automation markers live in the Chrome binary itself, not in any
//! script-visible surface. Before launch, a patched copy of the binary is
//! prepared with those byte patterns neutralized. Aho-Corasick gives one
//! O(n) pass over the file; large binaries are patched through a memory
//! map.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use memmap2::MmapMut;
use rand::Rng;

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq)]
enum PatchStrategy {
    /// Replace the prefix with random lowercase letters (marker names
    /// referenced by offset elsewhere keep their length)
    RandomizePrefix,
    /// Shuffle the letters in place
    Scramble,
}

struct MarkerPattern {
    pattern: &'static [u8],
    strategy: PatchStrategy,
}

static MARKER_PATTERNS: &[MarkerPattern] = &[
    MarkerPattern {
        pattern: b"$cdc_",
        strategy: PatchStrategy::RandomizePrefix,
    },
    MarkerPattern {
        pattern: b"cdc_",
        strategy: PatchStrategy::RandomizePrefix,
    },
    MarkerPattern {
        pattern: b"$wdc_",
        strategy: PatchStrategy::RandomizePrefix,
    },
    MarkerPattern {
        pattern: b"webdriver",
        strategy: PatchStrategy::Scramble,
    },
    MarkerPattern {
        pattern: b"HeadlessChrome",
        strategy: PatchStrategy::Scramble,
    },
    MarkerPattern {
        pattern: b"$chromeDriver",
        strategy: PatchStrategy::RandomizePrefix,
    },
];

static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn matcher() -> &'static AhoCorasick {
    MATCHER.get_or_init(|| {
        let patterns: Vec<&[u8]> = MARKER_PATTERNS.iter().map(|p| p.pattern).collect();
        AhoCorasick::new(&patterns).expect("marker automaton")
    })
}

/// Find a Chrome/Chromium binary on this system
pub fn find_chrome() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .ok_or(Error::ChromeNotFound)
}

/// Prepares a marker-free copy of the Chrome binary
pub struct MarkerPatcher {
    original: PathBuf,
    patched: PathBuf,
}

impl MarkerPatcher {
    pub fn new(chrome_path: &Path) -> Result<Self> {
        if !chrome_path.exists() {
            return Err(Error::patching(
                "new",
                format!("Chrome binary not found: {:?}", chrome_path),
            ));
        }

        let filename = chrome_path
            .file_name()
            .ok_or_else(|| Error::patching("new", "invalid binary path"))?;
        let patched = std::env::temp_dir().join("teragrab-chrome").join(filename);

        Ok(Self {
            original: chrome_path.to_path_buf(),
            patched,
        })
    }

    /// Path to the patched binary, patching first if the cached copy is
    /// missing or stale.
    ///
    /// On macOS the binary cannot leave its signed .app bundle, so the
    /// original path is returned unpatched; the script-level evasions
    /// still cover the cdc_ surface there.
    pub fn patched_path(&self) -> Result<PathBuf> {
        if cfg!(target_os = "macos") {
            tracing::warn!("Binary patching skipped on macOS (signed app bundle)");
            return Ok(self.original.clone());
        }

        if !self.is_cached() {
            self.patch()?;
        }
        Ok(self.patched.clone())
    }

    fn is_cached(&self) -> bool {
        if !self.patched.exists() {
            return false;
        }

        let newer_than_original = match (
            fs::metadata(&self.original).and_then(|m| m.modified()),
            fs::metadata(&self.patched).and_then(|m| m.modified()),
        ) {
            (Ok(orig), Ok(patched)) => patched > orig,
            _ => false,
        };

        newer_than_original && self.sample_is_clean()
    }

    /// Cheap staleness check: the first 64KB of a patched binary must not
    /// match any marker
    fn sample_is_clean(&self) -> bool {
        let Ok(mut file) = File::open(&self.patched) else {
            return false;
        };
        let mut buffer = vec![0u8; 64 * 1024];
        let Ok(n) = file.read(&mut buffer) else {
            return false;
        };
        buffer.truncate(n);
        !matcher().is_match(&buffer)
    }

    fn patch(&self) -> Result<()> {
        tracing::info!("Patching Chrome binary: {:?}", self.original);

        if let Some(parent) = self.patched.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.original, &self.patched)?;

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.patched)?;
        // Safety: the copy is private to this process until patching ends
        let mut map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| Error::patching("mmap", e.to_string()))?;

        let mut rng = rand::thread_rng();
        let mut count = 0usize;

        let matches: Vec<(usize, usize, usize)> = matcher()
            .find_iter(&map[..])
            .map(|m| (m.pattern().as_usize(), m.start(), m.end()))
            .collect();

        for (pattern_idx, start, end) in matches {
            let slice = &mut map[start..end];
            match MARKER_PATTERNS[pattern_idx].strategy {
                PatchStrategy::RandomizePrefix => {
                    for byte in slice.iter_mut() {
                        if byte.is_ascii_alphabetic() {
                            *byte = rng.gen_range(b'a'..=b'z');
                        }
                    }
                }
                PatchStrategy::Scramble => {
                    // Reverse is as good as a shuffle for breaking the
                    // literal, and stays alphabetic
                    slice.reverse();
                }
            }
            count += 1;
        }

        map.flush()
            .map_err(|e| Error::patching("flush", e.to_string()))?;
        drop(map);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.patched)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&self.patched, perms)?;
        }

        tracing::info!("Neutralized {} marker occurrences", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_binary_is_an_error() {
        let result = MarkerPatcher::new(Path::new("/nonexistent/chrome"));
        assert!(matches!(result, Err(Error::Patching { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_patch_removes_markers() {
        let dir = std::env::temp_dir().join("teragrab-patcher-test");
        fs::create_dir_all(&dir).unwrap();
        let fake = dir.join("fake-chrome");
        {
            let mut f = File::create(&fake).unwrap();
            f.write_all(b"prefix $cdc_asdjflasutopfhvcZLmcfl_ webdriver HeadlessChrome suffix")
                .unwrap();
        }

        let patcher = MarkerPatcher::new(&fake).unwrap();
        let patched = patcher.patched_path().unwrap();

        let bytes = fs::read(&patched).unwrap();
        assert!(!matcher().is_match(&bytes));
        // Length untouched - offsets into the binary stay valid
        assert_eq!(bytes.len(), fs::read(&fake).unwrap().len());

        let _ = fs::remove_file(&fake);
    }
}
