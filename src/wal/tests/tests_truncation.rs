//! Torn-frame and corruption tests: the youngest file's tail may be
//! truncated, everything else is an irrecoverable prefix.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::model::{QuadIds, TIME_MAX};
    use crate::wal::{TxOp, TxRecord, Wal, WalError};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_records(dir: &std::path::Path, n: u64) {
        let (mut wal, _) = Wal::open(dir).expect("open");
        for _ in 0..n {
            let tx = wal.begin_tx();
            wal.append(&TxRecord {
                tx_id: tx,
                tx_time: 1_000 + tx,
                ops: vec![TxOp::Add {
                    ids: QuadIds::new(tx, 2, 3, 0),
                    valid_from: 100,
                    valid_to: TIME_MAX,
                }],
            })
            .expect("append");
        }
    }

    #[test]
    fn wal__torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 3);

        // Append a frame header that promises more bytes than exist.
        let path = dir.path().join("000000001.wal");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0x00, 0x00, 0x00, 0xAA, 0xBB]).unwrap();
        drop(file);

        let (mut wal, records) = Wal::open(dir.path()).expect("open with torn tail");
        assert_eq!(records.len(), 3, "intact frames survive");

        // The log keeps accepting appends at the truncation point.
        let tx = wal.begin_tx();
        assert_eq!(tx, 4);
        wal.append(&TxRecord {
            tx_id: tx,
            tx_time: 1_000 + tx,
            ops: Vec::new(),
        })
        .expect("append after truncation");
        drop(wal);

        let (_, records) = Wal::open(dir.path()).expect("reopen");
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn wal__final_frame_bad_crc_is_torn() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 2);

        // Flip the last byte of the file — the final frame's CRC field.
        let path = dir.path().join("000000001.wal");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let (_, records) = Wal::open(dir.path()).expect("open");
        assert_eq!(records.len(), 1, "the torn final frame is dropped");
    }

    #[test]
    fn wal__interior_bad_crc_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 3);

        // Corrupt a payload byte of the FIRST frame; later frames are
        // intact, so this is not a torn tail.
        let path = dir.path().join("000000001.wal");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[25] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = Wal::open(dir.path()).unwrap_err();
        assert!(matches!(err, WalError::Corrupted { .. }));
    }

    #[test]
    fn wal__bad_header_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 1);

        let path = dir.path().join("000000001.wal");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = 0x00;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            Wal::open(dir.path()),
            Err(WalError::Corrupted { .. })
        ));
    }
}
