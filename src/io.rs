use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

/// Open a text input, transparently decompressing it if the name ends in `.gz`.
pub fn open_text<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead + Send> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// Input from a file if one is given, stdin otherwise.
pub fn open_input(path: Option<&Path>) -> io::Result<Box<dyn BufRead + Send>> {
    match path {
        Some(p) => open_text(p),
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

/// Output to a file if one is given, stdout otherwise.
pub fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write + Send>> {
    match path {
        Some(p) => Ok(Box::new(BufWriter::new(File::create(p)?))),
        None => Ok(Box::new(io::stdout())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Read;

    #[test]
    fn reads_plain_and_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("reads.kraken");
        std::fs::write(&plain, "C\tr1\t2\t100\t2:5\n").unwrap();

        let gz = dir.path().join("reads.kraken.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"C\tr1\t2\t100\t2:5\n").unwrap();
        enc.finish().unwrap();

        let mut a = String::new();
        open_text(&plain).unwrap().read_to_string(&mut a).unwrap();
        let mut b = String::new();
        open_text(&gz).unwrap().read_to_string(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_text(dir.path().join("nope.txt")).is_err());
    }
}
