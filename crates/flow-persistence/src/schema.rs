//! Esquema Diesel (mantenido a mano). Reemplazable con `diesel print-schema`.

diesel::table! {
    suspended_runs (run_id) {
        run_id -> Uuid,
        pipeline_id -> Text,
        status -> Text,
        claimed -> Bool,
        state -> Jsonb,
        suspended_at -> Nullable<Timestamptz>,
        updated_at -> Timestamptz,
    }
}
