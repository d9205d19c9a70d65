mod world;

pub use world::{
    AgentState, BulletInfo, BulletOwner, EnemyInfo, GameStats, PowerUpInfo, PowerUpKind,
    WorldSnapshot,
};
