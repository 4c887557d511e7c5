//! The simulation world and its per-step pipeline.
//!
//! A world owns every entity arena plus the broadphase, contact cache,
//! island manager, and event machinery. `step` drives the pipeline in
//! dependency order: queue flush, effect pre-pass, force application,
//! velocity integration, collision, contact caching, filtering and
//! pre-solve events, island assembly, velocity solve, position
//! integration, position correction, sleep update, and publication.

pub mod events;

use std::collections::HashSet;
use std::time::Instant;

use glam::Vec3;
use log::warn;

use crate::collision::broadphase::BroadPhase;
use crate::collision::contact::{ContactEvent, ContactFlags, ContactManager, PairKey};
use crate::collision::filter::{CollisionTable, FilterBlockPhase, FilterMode};
use crate::collision::narrowphase;
use crate::collision::queries::{self, CastFilter, CastHit, Frustum, Ray};
use crate::config::{SolverConfig, WorldConfig};
use crate::constraints::joints::{CustomRow, Joint, JointFlags, JointKind, JointNotice};
use crate::core::body::{DynamicState, RigidBody};
use crate::core::collider::Collider;
use crate::core::node::{self, PhysicsNode};
use crate::core::queue::{BroadPhaseAction, MassAction, TransformAction};
use crate::core::types::{Aabb, Inertia, Mass, Material, Transform};
use crate::dynamics::integrator::Integrator;
use crate::dynamics::island::IslandManager;
use crate::dynamics::sleep::update_island_sleep;
use crate::dynamics::solver::{IslandSolver, PendingPositionSolve, SolverMetrics};
use crate::effects::{effect_type_bits, EffectContext, EffectKind, EffectScope, PhysicsEffect};
use crate::utils::allocator::{Arena, BodyId, ColliderId, EffectId, JointId, NodeId};
use crate::utils::logging::ScopedTimer;
use crate::utils::profiling::StepProfile;

use self::events::{
    CollisionEventData, ContactPointView, EventDispatcher, EventQueue, PhysicsEvent,
};

type CustomEffectHook = Box<dyn FnMut(EffectId, &mut RigidBody, f32) + Send>;
type CustomJointHook = Box<dyn FnMut(JointId, &mut Vec<CustomRow>) + Send>;

/// Central simulation container orchestrating all subsystems.
pub struct PhysicsWorld {
    pub config: WorldConfig,
    pub solver_config: SolverConfig,
    pub collision_table: CollisionTable,
    pub profile: StepProfile,

    bodies: Arena<RigidBody>,
    colliders: Arena<Collider>,
    joints: Arena<Joint>,
    nodes: Arena<PhysicsNode>,
    effects: Arena<PhysicsEffect>,

    broadphase: BroadPhase,
    contact_manager: ContactManager,
    islands: IslandManager,
    island_solver: IslandSolver,
    integrator: Integrator,

    events: EventQueue,
    dispatcher: EventDispatcher,
    dirty_nodes: Vec<NodeId>,
    time_accumulated: f32,
    last_metrics: SolverMetrics,
    /// Bodies asleep as of the last publication, for wake-event edges.
    asleep_last_publish: HashSet<BodyId>,

    custom_effect_hook: Option<CustomEffectHook>,
    custom_joint_hook: Option<CustomJointHook>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(WorldConfig::default())
    }
}

impl PhysicsWorld {
    pub fn new(mut config: WorldConfig) -> Self {
        config.sanitize();
        let mut solver_config = SolverConfig::default();
        solver_config.sanitize();
        let contact_manager = ContactManager::new(config.max_contacts, config.tangent_mode);
        let integrator = Integrator::new(config.integration);
        Self {
            config,
            solver_config,
            collision_table: CollisionTable::new(),
            profile: StepProfile::default(),
            bodies: Arena::new(),
            colliders: Arena::new(),
            joints: Arena::new(),
            nodes: Arena::new(),
            effects: Arena::new(),
            broadphase: BroadPhase::default(),
            contact_manager,
            islands: IslandManager::new(),
            island_solver: IslandSolver::new(),
            integrator,
            events: EventQueue::new(),
            dispatcher: EventDispatcher::new(),
            dirty_nodes: Vec::new(),
            time_accumulated: 0.0,
            last_metrics: SolverMetrics::default(),
            asleep_last_publish: HashSet::new(),
            custom_effect_hook: None,
            custom_joint_hook: None,
        }
    }

    pub fn set_solver_config(&mut self, mut config: SolverConfig) {
        config.sanitize();
        self.solver_config = config;
    }

    // ---------------------------------------------------------- entities

    /// Adds a body with its own root physics node.
    pub fn add_body(&mut self, mut body: RigidBody) -> BodyId {
        let transform = body.transform;
        body.center_of_mass = transform.position;
        body.old_transform = transform;
        let node_id = self.nodes.insert(PhysicsNode::new(transform));
        body.node = node_id;
        let body_id = self.bodies.insert(body);
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.body = Some(body_id);
        }
        self.queue_node(node_id, |queue| {
            queue.queue_transform(TransformAction::READ_TRANSFORM);
            queue.queue_mass(MassAction::all());
        });
        body_id
    }

    /// Attaches a collider to a body's node. Its mass contribution and
    /// broadphase proxy are integrated at the next commit.
    pub fn attach_collider(&mut self, body_id: BodyId, mut collider: Collider) -> Option<ColliderId> {
        let node_id = self.bodies.get(body_id)?.node;
        collider.body = Some(body_id);
        collider.node = node_id;
        let collider_id = self.colliders.insert(collider);
        let dynamic = self
            .bodies
            .get(body_id)
            .map(|b| !b.is_static())
            .unwrap_or(false);
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.colliders.push(collider_id);
        }
        self.queue_node(node_id, |queue| {
            queue.queue_transform(TransformAction::READ_TRANSFORM);
            queue.queue_mass(MassAction::all());
            queue.queue_insert(dynamic);
        });
        Some(collider_id)
    }

    /// Attaches a collider on a child node under a body's node. The child
    /// keeps its own local transform; the collider still contributes mass
    /// and collisions to the nearest non-static ancestor body.
    pub fn add_child_collider(
        &mut self,
        parent: BodyId,
        mut collider: Collider,
        local_transform: Transform,
    ) -> Option<ColliderId> {
        let parent_node = self.bodies.get(parent)?.node;
        let node_id = self.nodes.insert(PhysicsNode::new(local_transform));
        node::attach(&mut self.nodes, node_id, parent_node);

        collider.body = node::active_body(&self.nodes, &self.bodies, node_id);
        collider.node = node_id;
        let dynamic = collider
            .body
            .and_then(|b| self.bodies.get(b))
            .map(|b| !b.is_static())
            .unwrap_or(false);
        let collider_id = self.colliders.insert(collider);
        if let Some(node_entry) = self.nodes.get_mut(node_id) {
            node_entry.colliders.push(collider_id);
        }
        self.queue_node(node_id, |queue| {
            queue.queue_transform(TransformAction::READ_TRANSFORM);
            queue.queue_insert(dynamic);
        });
        // The owning body's mass changes too.
        self.queue_node(parent_node, |queue| {
            queue.queue_transform(TransformAction::READ_TRANSFORM);
            queue.queue_mass(MassAction::all());
        });
        Some(collider_id)
    }

    /// Adds static scenery: a collider with its own node and no body.
    pub fn add_static_collider(&mut self, mut collider: Collider, transform: Transform) -> ColliderId {
        let node_id = self.nodes.insert(PhysicsNode::new(transform));
        collider.body = None;
        collider.node = node_id;
        let collider_id = self.colliders.insert(collider);
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.colliders.push(collider_id);
        }
        self.queue_node(node_id, |queue| {
            queue.queue_transform(TransformAction::READ_TRANSFORM);
            queue.queue_insert(false);
        });
        collider_id
    }

    /// Declares a joint between two colliders. The joint is valid only when
    /// both endpoints resolve.
    pub fn add_joint(&mut self, mut joint: Joint) -> JointId {
        let valid = self.colliders.contains(joint.colliders[0])
            && self.colliders.contains(joint.colliders[1]);
        joint.flags.set(JointFlags::VALID, valid);
        if !valid {
            warn!("joint added with a missing endpoint; it will not solve");
        }
        for collider_id in joint.colliders {
            if let Some(body_id) = self.colliders.get(collider_id).and_then(|c| c.body) {
                self.wake_body(body_id);
            }
        }
        self.joints.insert(joint)
    }

    pub fn add_effect(&mut self, effect: PhysicsEffect) -> EffectId {
        if effect.wakes_on_change() {
            if let EffectScope::Body(body_id) = effect.scope {
                self.wake_body(body_id);
            }
        }
        self.effects.insert(effect)
    }

    // Two-phase destruction: mark dying now (destroying contacts with
    // synchronous ended events so handlers see live entities), deallocate
    // during the next commit.

    pub fn remove_body(&mut self, body_id: BodyId) {
        let Some(body) = self.bodies.get_mut(body_id) else { return };
        body.state.insert(crate::core::body::BodyState::DYING);
        let node_id = body.node;
        let collider_ids = self
            .nodes
            .get(node_id)
            .map(|n| n.colliders.clone())
            .unwrap_or_default();
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.dying = true;
        }
        for collider_id in collider_ids {
            self.invalidate_collider_constraints(collider_id);
        }
        self.queue_node(node_id, |queue| queue.queue_removal());
    }

    pub fn remove_collider(&mut self, collider_id: ColliderId) {
        self.invalidate_collider_constraints(collider_id);
        let Some(collider) = self.colliders.get(collider_id) else { return };
        let node_id = collider.node;
        let standalone = collider.body.is_none();
        if standalone {
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.dying = true;
            }
        } else if let Some(node) = self.nodes.get_mut(node_id) {
            node.colliders.retain(|&c| c != collider_id);
        }
        self.broadphase.remove(collider_id);
        self.colliders.remove(collider_id);
        self.queue_node(node_id, |queue| {
            queue.queue_mass(MassAction::all());
            if standalone {
                queue.queue_removal();
            }
        });
    }

    pub fn remove_joint(&mut self, joint_id: JointId) {
        if let Some(joint) = self.joints.remove(joint_id) {
            for collider_id in joint.colliders {
                if let Some(body_id) = self.colliders.get(collider_id).and_then(|c| c.body) {
                    self.wake_body(body_id);
                }
            }
        }
    }

    pub fn remove_effect(&mut self, effect_id: EffectId) {
        self.effects.remove(effect_id);
    }

    /// Ends every contact touching a collider, dispatching the ended events
    /// synchronously so handlers still see the entity alive.
    fn invalidate_collider_constraints(&mut self, collider_id: ColliderId) {
        let keys = self.contact_manager.destroy_contacts_of(collider_id);
        for key in keys {
            let data = self.collision_data_for_pair(key);
            self.dispatcher.dispatch(&PhysicsEvent::CollisionEnded(data));
        }
        for (_, joint) in self.joints.iter_with_ids_mut() {
            if joint.colliders.contains(&collider_id) {
                joint.flags.remove(JointFlags::VALID);
            }
        }
    }

    // ---------------------------------------------------------- accessors

    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(id)
    }

    /// Mutable body access. Velocity and force changes are immediate;
    /// transform and mass changes must go through the world's setters so the
    /// deferred queue can repair broadphase and mass state.
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut RigidBody> {
        self.bodies.get_mut(id)
    }

    pub fn collider(&self, id: ColliderId) -> Option<&Collider> {
        self.colliders.get(id)
    }

    pub fn collider_mut(&mut self, id: ColliderId) -> Option<&mut Collider> {
        self.colliders.get_mut(id)
    }

    pub fn joint(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(id)
    }

    pub fn joint_mut(&mut self, id: JointId) -> Option<&mut Joint> {
        self.joints.get_mut(id)
    }

    pub fn effect_mut(&mut self, id: EffectId) -> Option<&mut PhysicsEffect> {
        self.effects.get_mut(id)
    }

    /// Call after mutating an effect's properties: wakes its covered bodies
    /// when the effect has wake-on-change set.
    pub fn notify_effect_changed(&mut self, id: EffectId) {
        let Some(effect) = self.effects.get(id) else { return };
        if !effect.wakes_on_change() {
            return;
        }
        match effect.scope {
            EffectScope::Body(body_id) => self.wake_body(body_id),
            EffectScope::Region(region_collider) => {
                let Some(region) = self.colliders.get(region_collider) else { return };
                let region_aabb = region.world_aabb;
                for collider_id in self.broadphase.query_aabb(&region_aabb) {
                    if let Some(body_id) = self.colliders.get(collider_id).and_then(|c| c.body) {
                        self.wake_body(body_id);
                    }
                }
            }
            EffectScope::Space | EffectScope::Level => {
                for body in self.bodies.iter_mut() {
                    if body.is_dynamic() {
                        body.wake_up();
                    }
                }
            }
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn contact_count(&self) -> usize {
        self.contact_manager.len()
    }

    /// Live contacts, for inspection and tests.
    pub fn contacts(&self) -> impl Iterator<Item = &crate::collision::contact::Contact> {
        self.contact_manager.contacts()
    }

    pub fn last_metrics(&self) -> &SolverMetrics {
        &self.last_metrics
    }

    pub fn subscribe_events<F>(&mut self, listener: F)
    where
        F: FnMut(&PhysicsEvent) + Send + 'static,
    {
        self.dispatcher.subscribe(listener);
    }

    /// Hook invoked for every body a custom effect covers.
    pub fn set_custom_effect_hook<F>(&mut self, hook: F)
    where
        F: FnMut(EffectId, &mut RigidBody, f32) + Send + 'static,
    {
        self.custom_effect_hook = Some(Box::new(hook));
    }

    /// Hook invoked before solving so user code can fill a custom joint's
    /// rows for the step.
    pub fn set_custom_joint_hook<F>(&mut self, hook: F)
    where
        F: FnMut(JointId, &mut Vec<CustomRow>) + Send + 'static,
    {
        self.custom_joint_hook = Some(Box::new(hook));
    }

    // ------------------------------------------------------ imperative API

    pub fn apply_force(&mut self, body_id: BodyId, force: Vec3) {
        if let Some(body) = self.bodies.get_mut(body_id) {
            body.wake_up();
            body.apply_force(force);
        }
    }

    pub fn apply_force_at_point(&mut self, body_id: BodyId, force: Vec3, point: Vec3) {
        if let Some(body) = self.bodies.get_mut(body_id) {
            body.wake_up();
            body.apply_force_at_point(force, point);
        }
    }

    pub fn apply_impulse(&mut self, body_id: BodyId, impulse: Vec3) {
        if let Some(body) = self.bodies.get_mut(body_id) {
            body.apply_impulse(impulse);
        }
    }

    pub fn apply_impulse_at_point(&mut self, body_id: BodyId, impulse: Vec3, point: Vec3) {
        if let Some(body) = self.bodies.get_mut(body_id) {
            body.apply_impulse_at_point(impulse, point);
        }
    }

    /// Wakes a body without resetting its sleep timer. The awoke event is
    /// published at the next step's publication phase.
    pub fn wake_body(&mut self, body_id: BodyId) {
        if let Some(body) = self.bodies.get_mut(body_id) {
            body.wake_up();
        }
    }

    pub fn force_body_awake(&mut self, body_id: BodyId) {
        if let Some(body) = self.bodies.get_mut(body_id) {
            body.force_awake();
        }
    }

    pub fn put_body_to_sleep(&mut self, body_id: BodyId) {
        if let Some(body) = self.bodies.get_mut(body_id) {
            if body.is_awake() && body.is_dynamic() {
                body.put_to_sleep();
                self.events.push(PhysicsEvent::RigidBodySlept(body_id));
            }
        }
    }

    pub fn set_dynamic_state(&mut self, body_id: BodyId, state: DynamicState) {
        let Some(body) = self.bodies.get_mut(body_id) else { return };
        body.set_dynamic_state(state);
        let node_id = body.node;
        let dynamic = state != DynamicState::Static;
        self.queue_node(node_id, |queue| {
            queue.queue_mass(MassAction::all());
            // The proxy migrates between the static and dynamic sets.
            queue.queue_removal();
            queue.queue_insert(dynamic);
        });
    }

    /// Moves a body, queuing the transform read. Kinematic bodies publish
    /// synthesized velocities from the delta at commit.
    pub fn set_transform(&mut self, body_id: BodyId, transform: Transform) {
        let Some(body) = self.bodies.get_mut(body_id) else { return };
        let kinematic = body.is_kinematic();
        body.transform = transform;
        let node_id = body.node;
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.local_transform = transform;
        }
        self.queue_node(node_id, move |queue| {
            queue.queue_transform(TransformAction::READ_TRANSFORM);
            if kinematic {
                queue.queue_transform(TransformAction::KINEMATIC_VELOCITY);
            }
            queue.queue_mass(MassAction::WORLD_INERTIA);
            queue.queue_update();
        });
        self.wake_body(body_id);
    }

    /// Moves a body without synthesizing kinematic velocity from the jump.
    pub fn teleport(&mut self, body_id: BodyId, transform: Transform) {
        self.set_transform(body_id, transform);
        if let Some(body) = self.bodies.get_mut(body_id) {
            body.old_transform = transform;
        }
        let Some(node_id) = self.bodies.get(body_id).map(|b| b.node) else { return };
        self.queue_node(node_id, |queue| {
            queue.queue_transform(TransformAction::OVERRIDE_OLD_TRANSFORM);
        });
    }

    pub fn set_body_material(&mut self, collider_id: ColliderId, material: Material) {
        if let Some(collider) = self.colliders.get_mut(collider_id) {
            collider.material = material;
            let node_id = collider.node;
            self.queue_node(node_id, |queue| queue.queue_mass(MassAction::all()));
        }
    }

    // ------------------------------------------------------------- queries

    pub fn ray_cast(&self, ray: &Ray, filter: &CastFilter) -> Vec<CastHit> {
        queries::ray_cast(&self.colliders, &self.bodies, ray, filter)
    }

    pub fn segment_cast(&self, start: Vec3, end: Vec3, filter: &CastFilter) -> Vec<CastHit> {
        queries::ray_cast(&self.colliders, &self.bodies, &Ray::segment(start, end), filter)
    }

    pub fn aabb_cast(&self, region: &Aabb, filter: &CastFilter) -> Vec<CastHit> {
        queries::aabb_cast(&self.colliders, &self.bodies, region, filter)
    }

    pub fn sphere_cast(&self, center: Vec3, radius: f32, filter: &CastFilter) -> Vec<CastHit> {
        queries::sphere_cast(&self.colliders, &self.bodies, center, radius, filter)
    }

    pub fn frustum_cast(&self, frustum: &Frustum, filter: &CastFilter) -> Vec<CastHit> {
        queries::frustum_cast(&self.colliders, &self.bodies, frustum, filter)
    }

    // ---------------------------------------------------------------- step

    /// Advances the simulation, consuming whole fixed timesteps from the
    /// accumulated time.
    pub fn step(&mut self, dt: f32) {
        self.time_accumulated += dt.max(0.0);
        while self.time_accumulated >= self.config.time_step {
            self.time_accumulated -= self.config.time_step;
            self.substep(self.config.time_step);
        }
    }

    fn substep(&mut self, dt: f32) {
        let _timer = ScopedTimer::new("world::substep");
        let step_start = Instant::now();
        self.profile.reset();

        // 1. Flush deferred mutations.
        let commit_start = Instant::now();
        self.commit_changes();
        self.profile.commit_time = commit_start.elapsed();

        // 2 & 3. Effects: pre-pass then force application.
        self.run_effects(dt);
        self.apply_world_gravity();

        // 4. Velocity integration.
        let integrate_start = Instant::now();
        for body in self.bodies.iter_mut() {
            self.integrator.integrate_velocity(body, dt);
        }
        self.profile.integrator_time = integrate_start.elapsed();

        // 5 & 6 & 7. Collision, contact caching, filtering.
        let broad_start = Instant::now();
        let pairs = self.broadphase.potential_pairs();
        self.profile.broad_phase_time = broad_start.elapsed();

        let narrow_start = Instant::now();
        self.update_contacts(&pairs);
        self.profile.narrow_phase_time = narrow_start.elapsed();
        self.dispatch_pre_solve_events();

        // 8. Island assembly.
        let island_start = Instant::now();
        self.prepare_custom_joints();
        self.islands.build(
            &mut self.bodies,
            &self.colliders,
            &mut self.contact_manager,
            &mut self.joints,
            &self.config,
        );
        let islands = self.islands.take_islands();
        self.profile.island_time = island_start.elapsed();

        // 9. Velocity solve.
        let solver_start = Instant::now();
        let mut metrics = SolverMetrics::default();
        let mut pending_positions: Vec<PendingPositionSolve> = Vec::new();
        for island in &islands {
            let (output, pending) = self.island_solver.solve_island(
                island,
                &mut self.bodies,
                &self.colliders,
                &mut self.contact_manager,
                &mut self.joints,
                &self.config,
                &self.solver_config,
                dt,
            );
            metrics.merge(&output.metrics);
            self.queue_joint_events(&output.notices, &output.exceeded_joints);
            if let Some(pending) = pending {
                pending_positions.push(pending);
            }
        }
        self.profile.solver_time = solver_start.elapsed();

        // 10. Position integration.
        for body in self.bodies.iter_mut() {
            self.integrator.integrate_position(body, dt);
        }

        // 11. Position correction.
        for pending in &mut pending_positions {
            self.island_solver.finish_position_solve(
                pending,
                &mut self.bodies,
                &self.solver_config,
                dt,
            );
        }

        self.sync_moved_bodies();

        // 12. Sleep update.
        let mut slept = Vec::new();
        for island in &islands {
            slept.extend(update_island_sleep(
                island,
                &mut self.bodies,
                dt,
                self.config.allow_sleeping,
            ));
        }

        // 13. Publication.
        self.publish_events(&slept);

        self.last_metrics = metrics;
        self.profile.body_count = self.bodies.len();
        self.profile.contact_count = self.contact_manager.len();
        self.profile.joint_count = self.joints.len();
        self.profile.island_count = islands.len();
        self.profile.awake_island_count = islands.len();
        self.profile.total_step_time = step_start.elapsed();
    }

    /// Baseline gravity is a space-scoped gravity source like any other, so
    /// bodies masking gravity through their space-effect ignore bits are
    /// exempt from it too.
    fn apply_world_gravity(&mut self) {
        let gravity = self.config.gravity;
        for body in self.bodies.iter_mut() {
            if body.is_dynamic()
                && body.is_awake()
                && body.ignored_space_effects & effect_type_bits::GRAVITY == 0
            {
                let force = gravity * body.mass.mass() * body.gravity_scale;
                body.apply_force(force);
            }
        }
    }

    // ---------------------------------------------------------- queue flush

    fn queue_node(&mut self, node_id: NodeId, configure: impl FnOnce(&mut crate::core::queue::ActionQueue)) {
        let Some(node_entry) = self.nodes.get_mut(node_id) else { return };
        configure(&mut node_entry.queue);
        if !node_entry.in_dirty_list && (node_entry.is_queued() || node_entry.dying) {
            node_entry.in_dirty_list = true;
            self.dirty_nodes.push(node_id);
        }
    }

    /// Flushes the deferred queue in fixed sub-pass order: transform, mass,
    /// then broadphase, so later passes see coherent inputs. Applying this
    /// twice without intervening mutation is a no-op.
    pub fn commit_changes(&mut self) {
        if self.dirty_nodes.is_empty() {
            return;
        }
        let dirty = std::mem::take(&mut self.dirty_nodes);

        // Transform pass.
        for &node_id in &dirty {
            self.commit_transform(node_id);
        }
        // Mass pass.
        for &node_id in &dirty {
            self.commit_mass(node_id);
        }
        // Broadphase pass; also finishes two-phase destruction.
        for &node_id in &dirty {
            self.commit_broadphase(node_id);
        }

        for &node_id in &dirty {
            if let Some(node_entry) = self.nodes.get_mut(node_id) {
                node_entry.queue.clear_actions();
                node_entry.in_dirty_list = false;
            }
        }
    }

    fn commit_transform(&mut self, node_id: NodeId) {
        let Some(node_entry) = self.nodes.get(node_id) else { return };
        let action = node_entry.queue.transform;
        if action.is_empty() {
            return;
        }

        node::recompute_world_transform(&mut self.nodes, node_id);
        let Some(node_entry) = self.nodes.get(node_id) else { return };
        let world = node_entry.world_transform;
        let body_id = node_entry.body;
        let collider_ids = node_entry.colliders.clone();

        if let Some(body_id) = body_id {
            if let Some(body) = self.bodies.get_mut(body_id) {
                body.transform = world;
                body.update_center_of_mass_from_transform();
                if action.contains(TransformAction::KINEMATIC_VELOCITY) {
                    body.update_kinematic_velocities(self.config.time_step);
                }
                if action.contains(TransformAction::OVERRIDE_OLD_TRANSFORM) {
                    body.old_transform = world;
                    if body.is_kinematic() {
                        body.velocity = Default::default();
                    }
                }
            }
        }
        for collider_id in collider_ids {
            if let Some(collider) = self.colliders.get_mut(collider_id) {
                collider.update_world_cache(&world);
            }
        }
        self.refresh_descendants(node_id);
    }

    /// Recomputes world transforms and collider caches for a node's child
    /// subtrees, stopping at nodes that own their own body.
    fn refresh_descendants(&mut self, node_id: NodeId) {
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(node_id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            let owns_body = self.nodes.get(current).map(|n| n.body.is_some()).unwrap_or(true);
            if owns_body {
                continue;
            }
            node::recompute_world_transform(&mut self.nodes, current);
            let Some(node_entry) = self.nodes.get(current) else { continue };
            let world = node_entry.world_transform;
            let collider_ids = node_entry.colliders.clone();
            stack.extend(node_entry.children.iter().copied());
            for collider_id in collider_ids {
                if let Some(collider) = self.colliders.get_mut(collider_id) {
                    collider.update_world_cache(&world);
                    if self.broadphase.contains(collider_id) {
                        self.broadphase.update(collider_id, collider.world_aabb);
                    }
                }
            }
        }
    }

    /// Colliders contributing to a body, paired with the transform from
    /// their node into the body's local frame: the body node's own
    /// colliders plus any on descendant nodes without a body of their own.
    fn owned_collider_frames(&self, node_id: NodeId) -> Vec<(ColliderId, Transform)> {
        let mut result = Vec::new();
        let mut stack = vec![(node_id, Transform::default())];
        let mut first = true;
        while let Some((current, to_body)) = stack.pop() {
            let Some(node_entry) = self.nodes.get(current) else { continue };
            if !first && node_entry.body.is_some() {
                continue;
            }
            first = false;
            for &collider_id in &node_entry.colliders {
                result.push((collider_id, to_body));
            }
            for &child in &node_entry.children {
                if let Some(child_node) = self.nodes.get(child) {
                    stack.push((child, to_body.combine(&child_node.local_transform)));
                }
            }
        }
        result
    }

    fn commit_mass(&mut self, node_id: NodeId) {
        let Some(node_entry) = self.nodes.get(node_id) else { return };
        if node_entry.queue.mass.is_empty() {
            return;
        }
        let Some(body_id) = node_entry.body else { return };
        let collider_frames = self.owned_collider_frames(node_id);
        let Some(body) = self.bodies.get(body_id) else { return };
        if !body.is_dynamic() {
            return;
        }

        // Accumulate collider contributions in the body's local frame:
        // total mass, center of mass, and inertia about the center via the
        // parallel-axis theorem.
        let mut total_mass = 0.0;
        let mut weighted_center = Vec3::ZERO;
        let mut contributions = Vec::new();
        for &(collider_id, to_body) in &collider_frames {
            if let Some(collider) = self.colliders.get(collider_id) {
                let mut contribution = collider.mass_contribution();
                if contribution.mass > 0.0 {
                    contribution.local_center = to_body.transform_point(contribution.local_center);
                    contribution.local_inertia = crate::utils::math::rotate_inertia(
                        contribution.local_inertia,
                        to_body.rotation,
                    );
                    total_mass += contribution.mass;
                    weighted_center += contribution.local_center * contribution.mass;
                    contributions.push(contribution);
                }
            }
        }

        let Some(body) = self.bodies.get_mut(body_id) else { return };
        if total_mass > 0.0 {
            let center = weighted_center / total_mass;
            let mut inertia = glam::Mat3::ZERO;
            for contribution in &contributions {
                let offset = contribution.local_center - center;
                let shift = contribution.mass
                    * (glam::Mat3::IDENTITY * offset.length_squared()
                        - outer_product(offset, offset));
                inertia += contribution.local_inertia + shift;
            }
            let (mass, scale) = match body.mass_override {
                Some(mass) => (mass, mass / total_mass),
                None => (total_mass, 1.0),
            };
            body.mass = Mass::from_mass(mass);
            body.inertia = Inertia::from_local_tensor(inertia * scale);
            body.position_offset = -center;
            body.update_center_of_mass_from_transform();
        } else if let Some(mass) = body.mass_override {
            body.mass = Mass::from_mass(mass);
        }
        body.apply_dof_locks();
    }

    fn commit_broadphase(&mut self, node_id: NodeId) {
        let Some(node_entry) = self.nodes.get(node_id) else { return };
        let action = node_entry.queue.broadphase;
        let dying = node_entry.dying;
        let collider_ids = node_entry.colliders.clone();

        if dying {
            for collider_id in collider_ids {
                self.broadphase.remove(collider_id);
                self.colliders.remove(collider_id);
            }
            if let Some(body_id) = self.nodes.get(node_id).and_then(|n| n.body) {
                self.bodies.remove(body_id);
            }
            node::detach(&mut self.nodes, node_id);
            self.nodes.remove(node_id);
            return;
        }

        if action.contains(BroadPhaseAction::REMOVE) {
            for &collider_id in &collider_ids {
                self.broadphase.remove(collider_id);
            }
            if let Some(node_entry) = self.nodes.get_mut(node_id) {
                node_entry
                    .queue
                    .broadphase
                    .remove(BroadPhaseAction::CURRENT_STATE);
            }
        }
        if action.intersects(BroadPhaseAction::INSERTS) {
            let dynamic = action.contains(BroadPhaseAction::DYNAMIC_INSERT);
            for &collider_id in &collider_ids {
                if let Some(collider) = self.colliders.get(collider_id) {
                    if dynamic {
                        self.broadphase.insert_dynamic(collider_id, collider.world_aabb);
                    } else {
                        self.broadphase.insert_static(collider_id, collider.world_aabb);
                    }
                }
            }
            if let Some(node_entry) = self.nodes.get_mut(node_id) {
                node_entry.queue.broadphase.insert(if dynamic {
                    BroadPhaseAction::IN_DYNAMIC
                } else {
                    BroadPhaseAction::IN_STATIC
                });
            }
        }
        if action.contains(BroadPhaseAction::UPDATE) {
            for &collider_id in &collider_ids {
                if let Some(collider) = self.colliders.get(collider_id) {
                    self.broadphase.update(collider_id, collider.world_aabb);
                }
            }
        }
    }

    /// After integration and correction, republish node caches, collider
    /// AABBs, and broadphase proxies for every moved dynamic body.
    fn sync_moved_bodies(&mut self) {
        let body_ids = self.bodies.ids();
        for body_id in body_ids {
            let Some(body) = self.bodies.get(body_id) else { continue };
            if !body.is_dynamic() || body.is_asleep() {
                continue;
            }
            let node_id = body.node;
            let transform = body.transform;
            if let Some(node_entry) = self.nodes.get_mut(node_id) {
                node_entry.local_transform = transform;
                node_entry.world_transform = transform;
                for collider_id in node_entry.colliders.clone() {
                    if let Some(collider) = self.colliders.get_mut(collider_id) {
                        collider.update_world_cache(&transform);
                        self.broadphase.update(collider_id, collider.world_aabb);
                    }
                }
            }
            self.refresh_descendants(node_id);
        }
    }

    // ------------------------------------------------------------- effects

    fn run_effects(&mut self, dt: f32) {
        // Pre-pass: cache world-space values per effect.
        let effect_ids = self.effects.ids();
        for &effect_id in &effect_ids {
            let owner_transform = {
                let Some(effect) = self.effects.get(effect_id) else { continue };
                match effect.scope {
                    EffectScope::Body(body_id) => {
                        self.bodies.get(body_id).map(|b| b.transform).unwrap_or_default()
                    }
                    EffectScope::Region(collider_id) => self
                        .colliders
                        .get(collider_id)
                        .map(|c| c.world_transform)
                        .unwrap_or_default(),
                    EffectScope::Space | EffectScope::Level => Transform::default(),
                }
            };
            if let Some(effect) = self.effects.get_mut(effect_id) {
                effect.pre_calculate(&owner_transform);
                if matches!(effect.kind, EffectKind::Custom) {
                    self.dispatcher
                        .dispatch(&PhysicsEvent::CustomPhysicsEffectPrecalculatePhase(effect_id));
                }
            }
        }

        // Application pass per scope.
        for &effect_id in &effect_ids {
            let (scope, type_bit, active) = match self.effects.get(effect_id) {
                Some(effect) => (effect.scope, effect.type_bit(), effect.is_active()),
                None => continue,
            };
            if !active {
                continue;
            }
            match scope {
                EffectScope::Space | EffectScope::Level => {
                    let targets: Vec<BodyId> = self
                        .bodies
                        .iter_with_ids()
                        .filter(|(_, b)| {
                            b.is_dynamic() && b.is_awake() && b.ignored_space_effects & type_bit == 0
                        })
                        .map(|(id, _)| id)
                        .collect();
                    self.apply_effect_to(effect_id, &targets, dt, None);
                }
                EffectScope::Body(body_id) => {
                    self.apply_effect_to(effect_id, &[body_id], dt, None);
                }
                EffectScope::Region(region_collider) => {
                    let Some(region) = self.colliders.get(region_collider) else { continue };
                    let region_aabb = region.world_aabb;
                    let overlapping = self.broadphase.query_aabb(&region_aabb);
                    let mut targets = Vec::new();
                    for collider_id in overlapping {
                        if collider_id == region_collider {
                            continue;
                        }
                        if let Some(body_id) =
                            self.colliders.get(collider_id).and_then(|c| c.body)
                        {
                            if !targets.contains(&body_id) {
                                targets.push(body_id);
                            }
                        }
                    }
                    self.apply_effect_to(effect_id, &targets, dt, Some(region_aabb));
                }
            }
        }
    }

    fn apply_effect_to(
        &mut self,
        effect_id: EffectId,
        targets: &[BodyId],
        dt: f32,
        region: Option<Aabb>,
    ) {
        for &body_id in targets {
            let context = self.effect_context_for(body_id, region);
            let Some(effect) = self.effects.get(effect_id) else { return };
            let is_custom = matches!(effect.kind, EffectKind::Custom);
            let Some(body) = self.bodies.get_mut(body_id) else { continue };
            if !body.is_dynamic() || body.is_asleep() {
                continue;
            }
            if is_custom {
                self.events.push(PhysicsEvent::ApplyCustomPhysicsEffect {
                    effect: effect_id,
                    body: body_id,
                });
                if let Some(hook) = self.custom_effect_hook.as_mut() {
                    hook(effect_id, body, dt);
                }
            } else {
                let Some(effect) = self.effects.get(effect_id) else { return };
                effect.apply_to_body(body, dt, &context);
            }
        }
    }

    /// Buoyancy and similar region effects need the body's overlap with the
    /// region volume.
    fn effect_context_for(&self, body_id: BodyId, region: Option<Aabb>) -> EffectContext {
        let mut context = EffectContext {
            gravity: self.config.gravity,
            ..EffectContext::default()
        };
        let Some(region_aabb) = region else { return context };
        let Some(body) = self.bodies.get(body_id) else { return context };
        let Some(node_entry) = self.nodes.get(body.node) else { return context };

        let mut total_volume = 0.0;
        let mut covered = 0.0;
        for &collider_id in &node_entry.colliders {
            let Some(collider) = self.colliders.get(collider_id) else { continue };
            let volume = collider.shape.volume();
            total_volume += volume;
            let aabb = collider.world_aabb;
            let overlap_min = aabb.min.max(region_aabb.min);
            let overlap_max = aabb.max.min(region_aabb.max);
            let size = (overlap_max - overlap_min).max(Vec3::ZERO);
            let aabb_size = (aabb.max - aabb.min).max(Vec3::splat(1e-6));
            let fraction = (size / aabb_size).element_product().clamp(0.0, 1.0);
            covered += volume * fraction;
        }
        if total_volume > 0.0 {
            context.submerged_fraction = (covered / total_volume).clamp(0.0, 1.0);
            context.displaced_volume = total_volume;
        } else {
            context.submerged_fraction = 0.0;
        }
        context
    }

    // ----------------------------------------------------------- collision

    fn update_contacts(&mut self, pairs: &[(ColliderId, ColliderId)]) {
        self.contact_manager
            .configure(self.config.max_contacts, self.config.tangent_mode);
        self.contact_manager.begin_step();

        // Joints may suppress collision between their connected pair.
        let mut no_collide: HashSet<(ColliderId, ColliderId)> = HashSet::new();
        for joint in self.joints.iter() {
            if !joint.flags.contains(JointFlags::COLLIDE_CONNECTED) {
                let key = PairKey::new(joint.colliders[0], joint.colliders[1]);
                no_collide.insert((key.a, key.b));
            }
        }

        for &(collider_a, collider_b) in pairs {
            let key = PairKey::new(collider_a, collider_b);
            if no_collide.contains(&(key.a, key.b)) {
                continue;
            }
            let (Some(a), Some(b)) = (self.colliders.get(key.a), self.colliders.get(key.b))
            else {
                continue;
            };
            if a.dormant || b.dormant {
                continue;
            }
            let mode = self.collision_table.mode(a.group, b.group);
            if mode == FilterMode::SkipDetection {
                continue;
            }

            let body_a = a.body;
            let body_b = b.body;
            // Colliders sharing an active body never collide with each other.
            if body_a.is_some() && body_a == body_b {
                continue;
            }
            let dynamics = |id: Option<BodyId>| {
                id.and_then(|id| self.bodies.get(id))
                    .map(|b| (b.is_dynamic(), b.is_awake()))
                    .unwrap_or((false, false))
            };
            let (dyn_a, awake_a) = dynamics(body_a);
            let (dyn_b, awake_b) = dynamics(body_b);
            if !dyn_a && !dyn_b {
                continue;
            }
            // A fully sleeping pair keeps its cached contact untouched so
            // its island state stays bitwise identical.
            if !(dyn_a && awake_a) && !(dyn_b && awake_b) {
                if let Some(contact) = self.contact_manager.get_mut(&key) {
                    contact.flags.insert(ContactFlags::ACTIVE);
                }
                continue;
            }

            let Some(raw) = narrowphase::collide(a, b) else { continue };

            let material = Material::combine_pair(&a.material, &b.material);
            let velocity = |id: Option<BodyId>| {
                id.and_then(|id| self.bodies.get(id))
                    .map(|b| b.velocity.linear)
                    .unwrap_or(Vec3::ZERO)
            };
            let relative_velocity = velocity(body_b) - velocity(body_a);

            let transform_a = a.world_transform;
            let transform_b = b.world_transform;
            let ghost = a.ghost || b.ghost;
            let sends_events = a.sends_events || b.sends_events;

            self.contact_manager.update_pair(
                key,
                &raw,
                &transform_a,
                &transform_b,
                body_a,
                body_b,
                material,
                relative_velocity,
            );
            if let Some(contact) = self.contact_manager.get_mut(&key) {
                contact.flags.set(ContactFlags::GHOST, ghost);
                contact
                    .flags
                    .set(ContactFlags::SKIPS_RESOLUTION, mode == FilterMode::SkipResolution);
                contact.sends_events = sends_events;
            }
        }

        self.contact_manager.prune_inactive();
    }

    fn prepare_custom_joints(&mut self) {
        let Some(hook) = self.custom_joint_hook.as_mut() else { return };
        for (joint_id, joint) in self.joints.iter_with_ids_mut() {
            if let JointKind::Custom { rows } = &mut joint.kind {
                hook(joint_id, rows);
                self.events.push(PhysicsEvent::ComputeCustomJointInfo(joint_id));
            }
        }
    }

    fn dispatch_pre_solve_events(&mut self) {
        let mut pre_solve: Vec<CollisionEventData> = Vec::new();
        for (key, event) in self.contact_manager.transitions() {
            if !matches!(event, ContactEvent::Started | ContactEvent::Persisted) {
                continue;
            }
            let Some(contact) = self.contact_manager.get(key) else { continue };
            let (Some(a), Some(b)) = (self.colliders.get(key.a), self.colliders.get(key.b))
            else {
                continue;
            };
            let Some(filter) = self.collision_table.filter(a.group, b.group) else { continue };
            let Some(block) = filter.block_for(FilterBlockPhase::PreSolve) else { continue };
            let mut data = self.collision_data(contact);
            data.event_name_override = block.event_name_override.clone();
            pre_solve.push(data);
        }
        for data in pre_solve {
            self.dispatcher
                .dispatch(&PhysicsEvent::GroupCollisionPreSolve(data));
        }
    }

    // --------------------------------------------------------- publication

    fn collision_data(&self, contact: &crate::collision::contact::Contact) -> CollisionEventData {
        CollisionEventData {
            collider_a: contact.pair.a,
            collider_b: contact.pair.b,
            body_a: contact.body_a,
            body_b: contact.body_b,
            points: contact
                .manifold
                .points
                .iter()
                .map(|p| ContactPointView {
                    local_point_a: p.local_a,
                    local_point_b: p.local_b,
                    world_point: p.world_point,
                    normal: contact.manifold.normal,
                    normal_impulse: p.normal_impulse,
                    friction_impulse: (p.tangent_impulse[0].powi(2)
                        + p.tangent_impulse[1].powi(2))
                    .sqrt(),
                    penetration: p.penetration,
                    relative_velocity: p.relative_velocity,
                })
                .collect(),
            event_name_override: None,
        }
    }

    fn collision_data_for_pair(&self, key: PairKey) -> CollisionEventData {
        let body_of = |id: ColliderId| self.colliders.get(id).and_then(|c| c.body);
        CollisionEventData {
            collider_a: key.a,
            collider_b: key.b,
            body_a: body_of(key.a),
            body_b: body_of(key.b),
            points: Vec::new(),
            event_name_override: None,
        }
    }

    fn queue_joint_events(&mut self, notices: &[(JointId, JointNotice)], exceeded: &[JointId]) {
        for &(joint_id, notice) in notices {
            let data = events::JointEventData { joint: joint_id };
            let event = match notice {
                JointNotice::LowerLimitReached => PhysicsEvent::JointLowerLimitReached(data),
                JointNotice::UpperLimitReached => PhysicsEvent::JointUpperLimitReached(data),
            };
            self.events.push(event);
        }
        for &joint_id in exceeded {
            self.events
                .push(PhysicsEvent::JointExceedImpulseLimit(events::JointEventData {
                    joint: joint_id,
                }));
            if let Some(joint) = self.joints.get_mut(joint_id) {
                if joint.flags.contains(JointFlags::AUTO_SNAPS) {
                    joint.flags.remove(JointFlags::VALID);
                    warn!("joint snapped after exceeding its impulse budget");
                }
            }
        }
    }

    fn publish_events(&mut self, slept: &[BodyId]) {
        // Collision transitions recorded during the step.
        let transitions: Vec<(PairKey, ContactEvent)> =
            self.contact_manager.transitions().to_vec();
        let mut collision_events = Vec::new();
        for (key, transition) in transitions {
            let sends = match self.contact_manager.get(&key) {
                Some(contact) => contact.sends_events,
                None => {
                    // Ended contact: fall back to the colliders' flags.
                    [key.a, key.b].iter().any(|&id| {
                        self.colliders.get(id).map(|c| c.sends_events).unwrap_or(false)
                    })
                }
            };
            if !sends {
                continue;
            }
            let data = match self.contact_manager.get(&key) {
                Some(contact) => self.collision_data(contact),
                None => self.collision_data_for_pair(key),
            };

            let group_block = self
                .colliders
                .get(key.a)
                .zip(self.colliders.get(key.b))
                .and_then(|(a, b)| self.collision_table.filter(a.group, b.group))
                .and_then(|filter| {
                    let phase = match transition {
                        ContactEvent::Started => FilterBlockPhase::Start,
                        ContactEvent::Persisted => FilterBlockPhase::Persist,
                        ContactEvent::Ended => FilterBlockPhase::End,
                    };
                    filter.block_for(phase).cloned()
                });

            collision_events.push(match transition {
                ContactEvent::Started => PhysicsEvent::CollisionStarted(data.clone()),
                ContactEvent::Persisted => PhysicsEvent::CollisionPersisted(data.clone()),
                ContactEvent::Ended => PhysicsEvent::CollisionEnded(data.clone()),
            });
            if let Some(block) = group_block {
                let mut group_data = data;
                group_data.event_name_override = block.event_name_override.clone();
                collision_events.push(match transition {
                    ContactEvent::Started => PhysicsEvent::GroupCollisionStarted(group_data),
                    ContactEvent::Persisted => PhysicsEvent::GroupCollisionPersisted(group_data),
                    ContactEvent::Ended => PhysicsEvent::GroupCollisionEnded(group_data),
                });
            }
        }

        for event in collision_events {
            self.events.push(event);
        }

        for &body_id in slept {
            self.events.push(PhysicsEvent::RigidBodySlept(body_id));
        }
        // Wake edges since the last publication, including wake-ups from
        // between-step API calls.
        let mut asleep_now = HashSet::new();
        for (body_id, body) in self.bodies.iter_with_ids() {
            if body.is_asleep() {
                asleep_now.insert(body_id);
            } else if self.asleep_last_publish.contains(&body_id) {
                self.events.push(PhysicsEvent::RigidBodyAwoke(body_id));
            }
        }
        self.asleep_last_publish = asleep_now;

        self.events.push(PhysicsEvent::PhysicsUpdateFinished);

        for event in self.events.drain() {
            self.dispatcher.dispatch(&event);
        }
    }
}

fn outer_product(a: Vec3, b: Vec3) -> glam::Mat3 {
    glam::Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}
