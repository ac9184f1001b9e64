use std::io::{self, Cursor, Read, Write};

use tracing::debug;

use crate::activation::Activation;
use crate::error::LoadError;
use crate::network::{LearningParams, Network, Stats};
use crate::snapshot::{NetworkSnapshot, SNAPSHOT_VERSION};
use crate::storage;

impl Network {
    /// Serialize a versioned, chunked network image.
    pub fn save_image_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(storage::MAGIC)?;
        storage::write_u32_le(w, storage::VERSION_CURRENT)?;

        self.write_parm_chunk(w)?;
        self.write_stat_chunk(w)?;
        self.write_node_chunk(w)?;
        self.write_conn_chunk(w)?;
        let mut payload = Vec::with_capacity(8);
        storage::write_u64_le(&mut payload, self.rng.state())?;
        storage::write_chunk_lz4(w, *b"PRNG", &payload)
    }

    /// Load a network image. Unknown chunks are skipped.
    pub fn load_image_from<R: Read>(r: &mut R) -> Result<Network, LoadError> {
        let magic = storage::read_exact::<8, _>(r)?;
        if &magic != storage::MAGIC {
            return Err(LoadError::BadMagic);
        }
        let version = storage::read_u32_le(r)?;
        if version != storage::VERSION_CURRENT {
            return Err(LoadError::UnsupportedVersion(version));
        }

        let mut parm: Option<(usize, usize, LearningParams)> = None;
        let mut stat: Option<(Stats, u64)> = None;
        let mut nodes: Option<(Vec<Vec<f32>>, Vec<Vec<Activation>>)> = None;
        let mut conns: Option<ConnPayload> = None;
        let mut rng_state: Option<u64> = None;

        loop {
            let (tag, len) = match storage::read_chunk_header(r) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let mut cursor = Cursor::new(storage::read_chunk_lz4(r, len)?);
            match &tag {
                b"PARM" => parm = Some(read_parm_payload(&mut cursor)?),
                b"STAT" => stat = Some(read_stat_payload(&mut cursor)?),
                b"NODE" => nodes = Some(read_node_payload(&mut cursor)?),
                b"CONN" => conns = Some(read_conn_payload(&mut cursor)?),
                b"PRNG" => rng_state = Some(storage::read_u64_le(&mut cursor)?),
                other => debug!(tag = ?String::from_utf8_lossy(other), "skipping unknown chunk"),
            }
        }

        let (input_size, output_size, params) = parm.ok_or(LoadError::MissingChunk("PARM"))?;
        let (node_confidence, activations) = nodes.ok_or(LoadError::MissingChunk("NODE"))?;
        let conns = conns.ok_or(LoadError::MissingChunk("CONN"))?;
        let (stats, ticks) = stat.unwrap_or_default();

        Network::from_snapshot(NetworkSnapshot {
            version: SNAPSHOT_VERSION,
            input_size,
            output_size,
            weights: conns.weights,
            biases: conns.biases,
            connection_confidence: conns.confidence,
            node_confidence,
            activations,
            params,
            stats,
            ticks,
            rng_state,
        })
    }

    /// Exact serialized size in bytes for the current image.
    pub fn image_size_bytes(&self) -> io::Result<usize> {
        let mut cw = storage::CountingWriter::new();
        self.save_image_to(&mut cw)?;
        Ok(cw.written())
    }

    pub fn save_image_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.save_image_to(&mut buf)?;
        Ok(buf)
    }

    pub fn load_image_bytes(bytes: &[u8]) -> Result<Network, LoadError> {
        Self::load_image_from(&mut Cursor::new(bytes))
    }

    fn write_parm_chunk<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut payload = Vec::with_capacity(28);
        storage::write_len(&mut payload, self.input_size())?;
        storage::write_len(&mut payload, self.output_size())?;
        let p = &self.params;
        for v in [
            p.base_learning_rate,
            p.confidence_modifier,
            p.mutation_threshold,
            p.mutation_rate,
            p.reward_scaling,
        ] {
            storage::write_f32_le(&mut payload, v)?;
        }
        storage::write_chunk_lz4(w, *b"PARM", &payload)
    }

    fn write_stat_chunk<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let s = &self.stats;
        let mut payload = Vec::with_capacity(96);
        storage::write_u64_le(&mut payload, s.training_iterations)?;
        storage::write_f32_le(&mut payload, s.last_error)?;
        storage::write_f64_le(&mut payload, s.cumulative_reward)?;
        for v in [
            s.reward_count,
            s.paths_deleted,
            s.node_mutations,
            s.weight_mutations,
            s.pruned,
            s.grown,
            s.boosted,
            s.integrity_repairs,
            self.ticks,
        ] {
            storage::write_u64_le(&mut payload, v)?;
        }
        storage::write_chunk_lz4(w, *b"STAT", &payload)
    }

    fn write_node_chunk<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut payload = Vec::new();
        storage::write_len(&mut payload, self.layers.len())?;
        for layer in &self.layers {
            storage::write_f32_slice(&mut payload, &layer.confidence)?;
            storage::write_len(&mut payload, layer.activations.len())?;
            for a in &layer.activations {
                storage::write_u8(&mut payload, a.tag())?;
            }
        }
        storage::write_chunk_lz4(w, *b"NODE", &payload)
    }

    fn write_conn_chunk<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut payload = Vec::new();
        storage::write_len(&mut payload, self.connections.len())?;
        for conn in &self.connections {
            storage::write_len(&mut payload, conn.rows())?;
            for row in &conn.weights {
                storage::write_f32_slice(&mut payload, row)?;
            }
            for row in &conn.confidence {
                storage::write_f32_slice(&mut payload, row)?;
            }
            storage::write_f32_slice(&mut payload, &conn.biases)?;
        }
        storage::write_chunk_lz4(w, *b"CONN", &payload)
    }
}

struct ConnPayload {
    weights: Vec<Vec<Vec<f32>>>,
    confidence: Vec<Vec<Vec<f32>>>,
    biases: Vec<Vec<f32>>,
}

fn read_parm_payload<R: Read>(r: &mut R) -> io::Result<(usize, usize, LearningParams)> {
    let input = storage::read_len(r)?;
    let output = storage::read_len(r)?;
    let params = LearningParams {
        base_learning_rate: storage::read_f32_le(r)?,
        confidence_modifier: storage::read_f32_le(r)?,
        mutation_threshold: storage::read_f32_le(r)?,
        mutation_rate: storage::read_f32_le(r)?,
        reward_scaling: storage::read_f32_le(r)?,
    };
    Ok((input, output, params))
}

fn read_stat_payload<R: Read>(r: &mut R) -> io::Result<(Stats, u64)> {
    let mut s = Stats {
        training_iterations: storage::read_u64_le(r)?,
        last_error: storage::read_f32_le(r)?,
        cumulative_reward: storage::read_f64_le(r)?,
        ..Stats::default()
    };
    s.reward_count = storage::read_u64_le(r)?;
    s.paths_deleted = storage::read_u64_le(r)?;
    s.node_mutations = storage::read_u64_le(r)?;
    s.weight_mutations = storage::read_u64_le(r)?;
    s.pruned = storage::read_u64_le(r)?;
    s.grown = storage::read_u64_le(r)?;
    s.boosted = storage::read_u64_le(r)?;
    s.integrity_repairs = storage::read_u64_le(r)?;
    let ticks = storage::read_u64_le(r)?;
    Ok((s, ticks))
}

type NodePayload = (Vec<Vec<f32>>, Vec<Vec<Activation>>);

fn read_node_payload<R: Read>(r: &mut R) -> Result<NodePayload, LoadError> {
    let layers = storage::read_len(r)?;
    let mut confidence = Vec::with_capacity(layers);
    let mut activations = Vec::with_capacity(layers);
    for _ in 0..layers {
        confidence.push(storage::read_f32_vec(r)?);
        let n = storage::read_len(r)?;
        let mut tags = Vec::with_capacity(n);
        for _ in 0..n {
            let tag = storage::read_u8(r)?;
            tags.push(Activation::from_tag(tag).ok_or(LoadError::UnknownActivation(tag))?);
        }
        activations.push(tags);
    }
    Ok((confidence, activations))
}

fn read_conn_payload<R: Read>(r: &mut R) -> io::Result<ConnPayload> {
    let count = storage::read_len(r)?;
    let mut out = ConnPayload {
        weights: Vec::with_capacity(count),
        confidence: Vec::with_capacity(count),
        biases: Vec::with_capacity(count),
    };
    for _ in 0..count {
        let rows = storage::read_len(r)?;
        let weights = (0..rows).map(|_| storage::read_f32_vec(r)).collect::<io::Result<_>>()?;
        let confidence = (0..rows).map(|_| storage::read_f32_vec(r)).collect::<io::Result<_>>()?;
        out.weights.push(weights);
        out.confidence.push(confidence);
        out.biases.push(storage::read_f32_vec(r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::seeded;
    use crate::network::TrainSignal;

    #[test]
    fn image_round_trip_preserves_forward() {
        let mut net = seeded(81);
        for k in 0..20 {
            let r = if k % 4 == 0 { -1.0 } else { 0.5 };
            net.tick([0.2, 0.7, 0.0, 0.4], Some(TrainSignal::Reward(r)));
        }
        let bytes = net.save_image_bytes().expect("save");
        assert_eq!(bytes.len(), net.image_size_bytes().expect("size"));

        let mut restored = Network::load_image_bytes(&bytes).expect("load");
        let input = [0.5, 0.1, 0.9, 0.3];
        let a = net.forward(input);
        let b = restored.forward(input);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
        assert_eq!(restored.stats().pruned, net.stats().pruned);
        assert_eq!(restored.ticks(), net.ticks());
        assert_eq!(restored.snapshot(), net.snapshot());
    }

    #[test]
    fn unknown_chunks_are_skipped() {
        let net = seeded(82);
        let mut bytes = net.save_image_bytes().expect("save");
        storage::write_chunk_lz4(&mut bytes, *b"XTRA", b"future data").expect("chunk");
        assert!(Network::load_image_bytes(&bytes).is_ok());
    }

    #[test]
    fn bad_headers_and_missing_chunks_fail() {
        assert!(matches!(
            Network::load_image_bytes(b"NOTANIMAGE00"),
            Err(LoadError::BadMagic)
        ));

        let mut bytes = storage::MAGIC.to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            Network::load_image_bytes(&bytes),
            Err(LoadError::UnsupportedVersion(7))
        ));

        let mut bytes = storage::MAGIC.to_vec();
        bytes.extend_from_slice(&storage::VERSION_CURRENT.to_le_bytes());
        assert!(matches!(
            Network::load_image_bytes(&bytes),
            Err(LoadError::MissingChunk("PARM"))
        ));
    }
}
