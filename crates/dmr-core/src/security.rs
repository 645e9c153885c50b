use crate::domain::UserId;

/// Owner gate for relay management commands.
///
/// Every command, modal submit and button press goes through this check
/// before any state is touched; everyone else gets the uniform denial
/// response.
pub fn is_owner(user_id: Option<UserId>, owner_id: UserId) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    user_id == owner_id
}
