mod helpers;
mod history;
mod lift;
mod sync;
mod track;
mod workout;

pub(crate) use history::{cmd_history_routes, cmd_history_workouts};
pub(crate) use lift::{cmd_lift_cancel, cmd_lift_resume, cmd_lift_start, cmd_lift_status};
pub(crate) use sync::cmd_sync;
pub(crate) use track::cmd_track;
pub(crate) use workout::{
    cmd_workout_add, cmd_workout_assign, cmd_workout_delete, cmd_workout_list, cmd_workout_show,
    cmd_workout_unassign,
};
