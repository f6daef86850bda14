//! Simulation systems for the shape room.

use ripple_ecs::query::QueryId;
use ripple_ecs::EcsError;

use crate::components::{Position, Velocity};
use crate::tick::{SystemContext, TickLoop};

/// Wrap one coordinate around a `[-half, extent + half]` band.
///
/// A shape fully past one edge reappears just outside the opposite edge.
pub fn wrap(coord: f64, extent: f64, half: f64) -> f64 {
    if coord > extent + half {
        -half
    } else if coord < -half {
        extent + half
    } else {
        coord
    }
}

/// Linear integration with screen wrap-around, per axis.
pub fn movement(ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
    let dt = ctx.dt();
    let bounds = *ctx.config();
    for &entity in ctx.entities() {
        let Some(velocity) = ctx.get::<Velocity>(entity).copied() else {
            continue;
        };
        let Some(position) = ctx.get_mut::<Position>(entity) else {
            continue;
        };
        position.x = wrap(position.x + velocity.x * dt, bounds.bound_width, bounds.half_size);
        position.y = wrap(position.y + velocity.y * dt, bounds.bound_height, bounds.half_size);
    }
    Ok(())
}

/// Register the movement query and system on `tick_loop`.
pub fn install_movement(tick_loop: &mut TickLoop) -> Result<QueryId, EcsError> {
    let world = tick_loop.world_mut();
    let unknown = |name: &str| EcsError::UnknownComponent {
        name: name.to_owned(),
    };
    let velocity = world
        .component_id::<Velocity>()
        .ok_or_else(|| unknown("Velocity"))?;
    let position = world
        .component_id::<Position>()
        .ok_or_else(|| unknown("Position"))?;
    let query = world.register_query(&[velocity, position])?;
    tick_loop.add_system("movement", query, movement);
    Ok(query)
}
