use sea_orm::entity::prelude::*;

/// One link of a refresh-token rotation chain.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub user_id: i32,

    /// Shared by every session produced from one login
    pub token_family: String,

    /// Hex sha-256 of the refresh token; the plaintext is never stored
    #[sea_orm(unique)]
    pub refresh_token_hash: String,

    pub parent_session_id: Option<String>,

    pub rotation_count: i32,

    pub revoked: bool,

    pub remember_me: bool,

    pub is_admin: bool,

    pub expires_at: DateTimeUtc,

    pub access_token_expires_at: DateTimeUtc,

    pub ip_address: Option<String>,

    pub user_agent: Option<String>,

    pub device_name: Option<String>,

    pub device_type: Option<String>,

    pub browser: Option<String>,

    pub os: Option<String>,

    pub created_at: DateTimeUtc,

    pub last_active_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
