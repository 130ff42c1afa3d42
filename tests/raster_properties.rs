use furnisher_surrogate::features::{ring_area, ring_aspect_ratio};
use furnisher_surrogate::room::close_ring;
use furnisher_surrogate::{encode_frame, rasterize, IMG_SIZE};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Star-shaped ring with vertices on a 1/8 m grid, so translating or
/// doubling it is exact in floating point.
fn random_ring(rng: &mut ChaCha8Rng) -> Vec<[f64; 2]> {
    let n = rng.random_range(3..=9);
    let mut angles: Vec<f64> = (0..n)
        .map(|_| rng.random::<f64>() * std::f64::consts::TAU)
        .collect();
    angles.sort_by(|a, b| a.total_cmp(b));
    let snap = |v: f64| (v * 8.0).round() / 8.0;
    let pts: Vec<[f64; 2]> = angles
        .iter()
        .map(|a| {
            let r = rng.random_range(1.0..6.0);
            [snap(r * a.cos()), snap(r * a.sin())]
        })
        .collect();
    close_ring(&pts)
}

fn door_of(ring: &[[f64; 2]]) -> [f64; 2] {
    let (a, b) = (ring[0], ring[1]);
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

#[test]
fn rasterization_is_deterministic_and_binary() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..50 {
        let ring = random_ring(&mut rng);
        let a = rasterize(&ring, door_of(&ring)).unwrap();
        let b = rasterize(&ring, door_of(&ring)).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        for c in 0..2 {
            assert!(a.channel(c).iter().all(|&v| v == 0 || v == 255));
        }
        for (m, e) in a.channel(0).iter().zip(a.channel(1)) {
            assert!(*e == 0 || *m == 255, "edge pixel outside mask");
        }
        assert!(a.channel(2).iter().any(|&v| v > 0));
    }
}

#[test]
fn translation_leaves_mask_and_edges_unchanged() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..30 {
        let ring = random_ring(&mut rng);
        let moved: Vec<[f64; 2]> = ring.iter().map(|p| [p[0] + 256.0, p[1] - 128.0]).collect();
        let door = door_of(&ring);
        let a = rasterize(&ring, door).unwrap();
        let b = rasterize(&moved, [door[0] + 256.0, door[1] - 128.0]).unwrap();
        assert_eq!(a.channel(0), b.channel(0));
        assert_eq!(a.channel(1), b.channel(1));
    }
}

#[test]
fn uniform_scaling_leaves_mask_and_edges_unchanged() {
    let mut rng = ChaCha8Rng::seed_from_u64(13);
    for _ in 0..30 {
        let ring = random_ring(&mut rng);
        let doubled: Vec<[f64; 2]> = ring.iter().map(|p| [p[0] * 2.0, p[1] * 2.0]).collect();
        let door = door_of(&ring);
        let a = rasterize(&ring, door).unwrap();
        let b = rasterize(&doubled, [door[0] * 2.0, door[1] * 2.0]).unwrap();
        assert_eq!(a.channel(0), b.channel(0));
        assert_eq!(a.channel(1), b.channel(1));
    }
}

#[test]
fn door_at_a_vertex_maps_onto_that_vertex() {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    for _ in 0..50 {
        let ring = random_ring(&mut rng);
        let encoded = encode_frame(&ring).unwrap();
        for (p, px) in ring.iter().zip(&encoded.pixels) {
            let q = encoded.point_to_pixel(*p);
            assert!((q[0] - px[0]).abs() < 1e-9 && (q[1] - px[1]).abs() < 1e-9);
            let max = IMG_SIZE as f64 - 1.0;
            assert!((0.0..=max).contains(&px[0]) && (0.0..=max).contains(&px[1]));
        }
    }
}

#[test]
fn geometry_scalars_respect_their_bounds() {
    let mut rng = ChaCha8Rng::seed_from_u64(19);
    for _ in 0..100 {
        let ring = random_ring(&mut rng);
        let reversed: Vec<[f64; 2]> = ring.iter().rev().copied().collect();
        assert!(ring_area(&ring) >= 0.0);
        assert!((ring_area(&ring) - ring_area(&reversed)).abs() < 1e-9);
        assert!(ring_aspect_ratio(&ring) >= 1.0);
    }
}

#[test]
fn degenerate_rings_never_fail() {
    let cases: [&[[f64; 2]]; 3] = [
        &[[2.0, 2.0], [2.0, 2.0], [2.0, 2.0], [2.0, 2.0]],
        &[[0.0, 0.0], [3.0, 0.0], [6.0, 0.0], [0.0, 0.0]],
        &[[1.0, 1.0], [1.0 + 1e-9, 1.0], [1.0, 1.0 + 1e-9], [1.0, 1.0]],
    ];
    for ring in cases {
        let image = rasterize(ring, ring[0]).unwrap();
        assert!(image.channel(0).iter().any(|&v| v == 255));
    }
}
