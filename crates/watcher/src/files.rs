use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `content` to `path` via temp file, fsync and rename.
///
/// Readers either see the previous file or the complete new one.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    ensure_parent(path)?;

    let temp_path = temp_path_for(path);
    let mut file = fs::File::create(&temp_path)?;

    let cleanup_and_err = |e| {
        let _ = fs::remove_file(&temp_path);
        e
    };

    file.write_all(content).map_err(cleanup_and_err)?;
    file.sync_all().map_err(cleanup_and_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(cleanup_and_err)?;
    Ok(())
}

/// Append one line per entry, adding the trailing newline when missing.
pub fn append_lines(path: &Path, lines: &[String]) -> io::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    ensure_parent(path)?;
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        file.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            file.write_all(b"\n")?;
        }
    }
    file.flush()
}
