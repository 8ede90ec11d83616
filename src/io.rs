use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;

/// Read `.fvecs` records: each is an `i32` dimension followed by that many `f32`.
pub fn read_fvecs_from_reader<R: Read>(
    mut reader: R,
    limit: Option<usize>,
) -> io::Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::new();

    loop {
        if limit.is_some_and(|max| vectors.len() >= max) {
            break;
        }

        let mut dim_buf = [0u8; 4];
        match reader.read_exact(&mut dim_buf) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
        let dim = i32::from_le_bytes(dim_buf);
        if dim < 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("negative dimension {dim} encountered"),
            ));
        }

        let mut buffer = vec![0u8; dim as usize * 4];
        reader.read_exact(&mut buffer)?;
        let vector = buffer
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        vectors.push(vector);
    }

    Ok(vectors)
}

pub fn read_fvecs<P: AsRef<Path>>(path: P, limit: Option<usize>) -> io::Result<Vec<Vec<f32>>> {
    let file = File::open(path)?;
    read_fvecs_from_reader(BufReader::new(file), limit)
}

/// Flatten rows into one row-major buffer, zero-padding each row to a
/// multiple of 8 components. Returns the padded width.
pub fn flatten_padded(rows: &[Vec<f32>]) -> io::Result<(usize, Vec<f32>)> {
    let dim = rows.first().map_or(0, Vec::len);
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != dim) {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("row {idx} has {} components, expected {dim}", row.len()),
        ));
    }
    let width = dim.next_multiple_of(8);
    let mut flat = vec![0.0f32; rows.len() * width];
    for (row, dst) in rows.iter().zip(flat.chunks_exact_mut(width.max(1))) {
        dst[..dim].copy_from_slice(row);
    }
    Ok((width, flat))
}
