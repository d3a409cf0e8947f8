//! N-body simulation of the four Jovian planets around the sun.
//!
//! Two registrations share the integrator:
//!
//! - `nbody` copies its starting state from one process-wide template that
//!   every worker reads.
//! - `nbody_no_share` rebuilds the state from constants on every call and
//!   never touches the template.

use crate::workload::{ComputeError, ValidationError, WorkloadDef, expect_len};
use crate::Value;
use std::f64::consts::PI;
use std::sync::LazyLock;

const SOLAR_MASS: f64 = 4.0 * PI * PI;
const DAYS_PER_YEAR: f64 = 365.24;

/// Integration timestep
pub const DT: f64 = 0.01;

/// Integration sub-steps per reported loop
pub const STEPS_PER_LOOP: usize = 20_000;

/// Loop count carried by every dataset item
pub const NBODY_LOOPS: u64 = 5;

/// Items in the dataset
pub const NBODY_ITEMS: usize = 64;

/// Largest accepted relative drift from the initial energy
pub const ENERGY_TOLERANCE: f64 = 1e-3;

/// Index of the body whose velocity absorbs the net momentum (the sun)
const REFERENCE: usize = 0;

#[derive(Debug, Clone, Copy)]
struct Body {
    pos: [f64; 3],
    vel: [f64; 3],
    mass: f64,
}

impl Body {
    const fn new(pos: [f64; 3], vel: [f64; 3], mass: f64) -> Self {
        Self {
            pos,
            vel: [
                vel[0] * DAYS_PER_YEAR,
                vel[1] * DAYS_PER_YEAR,
                vel[2] * DAYS_PER_YEAR,
            ],
            mass: mass * SOLAR_MASS,
        }
    }
}

const BODIES: [Body; 5] = [
    // sun
    Body::new([0.0, 0.0, 0.0], [0.0, 0.0, 0.0], 1.0),
    // jupiter
    Body::new(
        [
            4.841_431_442_464_72e0,
            -1.160_320_044_027_428_4e0,
            -1.036_220_444_711_231_1e-1,
        ],
        [
            1.660_076_642_744_037e-3,
            7.699_011_184_197_404e-3,
            -6.904_600_169_720_63e-5,
        ],
        9.547_919_384_243_266e-4,
    ),
    // saturn
    Body::new(
        [
            8.343_366_718_244_58e0,
            4.124_798_564_124_305e0,
            -4.035_234_171_143_214e-1,
        ],
        [
            -2.767_425_107_268_624e-3,
            4.998_528_012_349_172e-3,
            2.304_172_975_737_639_3e-5,
        ],
        2.858_859_806_661_308e-4,
    ),
    // uranus
    Body::new(
        [
            1.289_436_956_213_913_1e1,
            -1.511_115_140_169_863_1e1,
            -2.233_075_788_926_557_3e-1,
        ],
        [
            2.964_601_375_647_616e-3,
            2.378_471_739_594_809_5e-3,
            -2.965_895_685_402_375_6e-5,
        ],
        4.366_244_043_351_563e-5,
    ),
    // neptune
    Body::new(
        [
            1.537_969_711_485_091_7e1,
            -2.591_931_460_998_796_4e1,
            1.792_587_729_503_711_8e-1,
        ],
        [
            2.680_677_724_903_893_2e-3,
            1.628_241_700_382_423e-3,
            -9.515_922_545_197_159e-5,
        ],
        5.151_389_020_466_114_5e-5,
    ),
];

/// Bodies plus the list of every unordered pair between them.
#[derive(Debug, Clone)]
struct System {
    bodies: Vec<Body>,
    pairs: Vec<(usize, usize)>,
}

impl System {
    fn solar() -> Self {
        let bodies = BODIES.to_vec();
        let mut pairs = Vec::with_capacity(bodies.len() * (bodies.len() - 1) / 2);
        for i in 0..bodies.len() {
            for j in i + 1..bodies.len() {
                pairs.push((i, j));
            }
        }
        Self { bodies, pairs }
    }

    fn offset_momentum(&mut self, reference: usize) {
        let mut p = [0.0f64; 3];
        for body in &self.bodies {
            for (axis, momentum) in p.iter_mut().enumerate() {
                *momentum -= body.vel[axis] * body.mass;
            }
        }
        let reference = &mut self.bodies[reference];
        for (axis, momentum) in p.iter().enumerate() {
            reference.vel[axis] = momentum / reference.mass;
        }
    }

    fn advance(&mut self, dt: f64, steps: usize) {
        for _ in 0..steps {
            for &(i, j) in &self.pairs {
                let (b1, b2) = (self.bodies[i], self.bodies[j]);
                let dx = b1.pos[0] - b2.pos[0];
                let dy = b1.pos[1] - b2.pos[1];
                let dz = b1.pos[2] - b2.pos[2];
                let mag = dt * (dx * dx + dy * dy + dz * dz).powf(-1.5);
                let b1m = b1.mass * mag;
                let b2m = b2.mass * mag;

                let v1 = &mut self.bodies[i].vel;
                v1[0] -= dx * b2m;
                v1[1] -= dy * b2m;
                v1[2] -= dz * b2m;

                let v2 = &mut self.bodies[j].vel;
                v2[0] += dx * b1m;
                v2[1] += dy * b1m;
                v2[2] += dz * b1m;
            }
            for body in &mut self.bodies {
                body.pos[0] += dt * body.vel[0];
                body.pos[1] += dt * body.vel[1];
                body.pos[2] += dt * body.vel[2];
            }
        }
    }

    fn energy(&self) -> f64 {
        let mut e = 0.0;
        for &(i, j) in &self.pairs {
            let (b1, b2) = (&self.bodies[i], &self.bodies[j]);
            let dx = b1.pos[0] - b2.pos[0];
            let dy = b1.pos[1] - b2.pos[1];
            let dz = b1.pos[2] - b2.pos[2];
            e -= (b1.mass * b2.mass) / (dx * dx + dy * dy + dz * dz).sqrt();
        }
        for body in &self.bodies {
            let [vx, vy, vz] = body.vel;
            e += body.mass * (vx * vx + vy * vy + vz * vz) / 2.0;
        }
        e
    }
}

static TEMPLATE: LazyLock<System> = LazyLock::new(System::solar);

/// Energy of the system right after momentum has been offset.
pub fn initial_energy() -> f64 {
    let mut system = System::solar();
    system.offset_momentum(REFERENCE);
    system.energy()
}

fn simulate(mut system: System, loops: u64) -> Vec<f64> {
    system.offset_momentum(REFERENCE);
    (0..loops)
        .map(|_| {
            system.advance(DT, STEPS_PER_LOOP);
            system.energy()
        })
        .collect()
}

fn generate() -> Vec<Value> {
    vec![Value::Int(NBODY_LOOPS); NBODY_ITEMS]
}

fn compute_shared(input: &Value) -> Result<Value, ComputeError> {
    let loops = input
        .as_int()
        .ok_or_else(|| ComputeError::unexpected("nbody", "int", input))?;
    Ok(Value::Floats(simulate(TEMPLATE.clone(), loops)))
}

fn compute_no_share(input: &Value) -> Result<Value, ComputeError> {
    let loops = input
        .as_int()
        .ok_or_else(|| ComputeError::unexpected("nbody_no_share", "int", input))?;
    Ok(Value::Floats(simulate(System::solar(), loops)))
}

fn check_energies(
    workload: &'static str,
    index: usize,
    energies: &[f64],
    loops: u64,
    reference: f64,
) -> Result<(), ValidationError> {
    let fail = |reason: String| ValidationError::Item {
        workload,
        index,
        reason,
    };
    if energies.len() as u64 != loops {
        return Err(fail(format!(
            "expected {loops} energy samples, got {}",
            energies.len()
        )));
    }
    for &e in energies {
        if !e.is_finite() {
            return Err(fail(format!("non-finite energy {e}")));
        }
        let drift = ((e - reference) / reference).abs();
        if drift > ENERGY_TOLERANCE {
            return Err(fail(format!(
                "energy {e} drifted {drift:.2e} from {reference} (tolerance {ENERGY_TOLERANCE:.0e})"
            )));
        }
    }
    Ok(())
}

fn validate_with(workload: &'static str, outputs: &[Value]) -> Result<(), ValidationError> {
    expect_len(workload, outputs, NBODY_ITEMS)?;
    let reference = initial_energy();
    for (index, output) in outputs.iter().enumerate() {
        let energies = output.as_floats().ok_or_else(|| ValidationError::Item {
            workload,
            index,
            reason: format!("expected a float sequence, got {}", output.kind()),
        })?;
        check_energies(workload, index, energies, NBODY_LOOPS, reference)?;
    }
    Ok(())
}

fn validate_shared(outputs: &[Value]) -> Result<(), ValidationError> {
    validate_with("nbody", outputs)
}

fn validate_no_share(outputs: &[Value]) -> Result<(), ValidationError> {
    validate_with("nbody_no_share", outputs)
}

inventory::submit! {
    WorkloadDef {
        name: "nbody",
        description: "5-body simulation copied from a shared template, 5 loops x 64",
        output_bytes: 256,
        generate,
        compute: compute_shared,
        validate: validate_shared,
    }
}

inventory::submit! {
    WorkloadDef {
        name: "nbody_no_share",
        description: "5-body simulation rebuilt per call with no shared state, 5 loops x 64",
        output_bytes: 256,
        generate,
        compute: compute_no_share,
        validate: validate_no_share,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_energy() {
        assert!((initial_energy() - -0.169_075_164).abs() < 1e-9);
    }

    #[test]
    fn test_offset_momentum_zeroes_net_momentum() {
        let mut system = System::solar();
        system.offset_momentum(REFERENCE);
        for axis in 0..3 {
            let p: f64 = system.bodies.iter().map(|b| b.vel[axis] * b.mass).sum();
            assert!(p.abs() < 1e-12, "axis {axis} momentum {p}");
        }
    }

    #[test]
    fn test_pairs_cover_every_body_once() {
        let system = System::solar();
        assert_eq!(system.pairs.len(), 10);
        assert!(system.pairs.iter().all(|&(i, j)| i < j && j < 5));
    }

    #[test]
    fn test_energy_is_conserved_over_one_loop() {
        let out = compute_no_share(&Value::Int(1)).unwrap();
        let energies = out.as_floats().unwrap();
        assert_eq!(energies.len(), 1);
        assert!(check_energies("nbody_no_share", 0, energies, 1, initial_energy()).is_ok());
    }

    #[test]
    fn test_shared_and_unshared_agree() {
        let shared = compute_shared(&Value::Int(1)).unwrap();
        let unshared = compute_no_share(&Value::Int(1)).unwrap();
        assert_eq!(shared, unshared);
        // The template itself is never advanced
        assert_eq!(TEMPLATE.bodies[1].pos, BODIES[1].pos);
    }

    #[test]
    fn test_zero_loops_yields_empty_sequence() {
        let out = compute_shared(&Value::Int(0)).unwrap();
        assert_eq!(out, Value::Floats(Vec::new()));
    }

    #[test]
    fn test_check_energies_rejects_divergence() {
        let reference = initial_energy();
        assert!(check_energies("nbody", 0, &[reference], 2, reference).is_err());
        assert!(check_energies("nbody", 0, &[f64::NAN], 1, reference).is_err());
        assert!(check_energies("nbody", 0, &[reference * 1.01], 1, reference).is_err());
        assert!(check_energies("nbody", 0, &[reference * 1.000_1], 1, reference).is_ok());
    }

    #[test]
    fn test_dataset() {
        let data = generate();
        assert_eq!(data.len(), NBODY_ITEMS);
        assert!(data.iter().all(|v| v.as_int() == Some(NBODY_LOOPS)));
    }
}
