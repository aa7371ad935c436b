// Table definitions for the dispatch database.
// Maintained by hand; keep in sync with the deployed DDL.

diesel::table! {
    clients (id) {
        id -> Uuid,
        display_name -> Varchar,
        street1 -> Nullable<Varchar>,
        city -> Nullable<Varchar>,
        state -> Nullable<Varchar>,
        zip_code -> Nullable<Varchar>,
        area_label -> Nullable<Varchar>,
        notes -> Nullable<Text>,
        source -> Varchar,
        crm_id -> Nullable<Varchar>,
        pairing_status -> Varchar,
        paired_technician_id -> Nullable<Uuid>,
        coords_stale -> Bool,
        needs_location_verification -> Bool,
        geocode_lat -> Nullable<Float8>,
        geocode_lng -> Nullable<Float8>,
        geocode_precision -> Nullable<Varchar>,
        geocode_confidence -> Nullable<Float8>,
        geocode_source -> Nullable<Varchar>,
        geocode_address_used -> Nullable<Varchar>,
        geocode_updated_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    technicians (id) {
        id -> Uuid,
        display_name -> Varchar,
        street1 -> Nullable<Varchar>,
        city -> Nullable<Varchar>,
        state -> Nullable<Varchar>,
        zip_code -> Nullable<Varchar>,
        area_label -> Nullable<Varchar>,
        transport_mode -> Varchar,
        is_active -> Bool,
        availability_status -> Varchar,
        geocode_lat -> Nullable<Float8>,
        geocode_lng -> Nullable<Float8>,
        geocode_precision -> Nullable<Varchar>,
        geocode_confidence -> Nullable<Float8>,
        geocode_source -> Nullable<Varchar>,
        geocode_address_used -> Nullable<Varchar>,
        geocode_updated_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    travel_time_cache (id) {
        id -> Uuid,
        origin_hash -> Varchar,
        dest_hash -> Varchar,
        origin_type -> Varchar,
        dest_type -> Varchar,
        mode -> Varchar,
        bucket -> Varchar,
        duration_sec_avg -> Int4,
        duration_sec_median -> Int4,
        duration_sec_pessimistic -> Int4,
        distance_meters -> Nullable<Int4>,
        sample_times -> Jsonb,
        sample_durations -> Jsonb,
        computed_at -> Timestamptz,
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    match_overrides (id) {
        id -> Uuid,
        client_id -> Uuid,
        technician_id -> Uuid,
        override_type -> Varchar,
        effective_from -> Nullable<Timestamptz>,
        effective_to -> Nullable<Timestamptz>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    match_proposals (id) {
        id -> Uuid,
        client_id -> Uuid,
        technician_id -> Uuid,
        travel_time_minutes -> Float8,
        distance_meters -> Nullable<Int4>,
        status -> Varchar,
        simulation_run_id -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    pairings (id) {
        id -> Uuid,
        client_id -> Uuid,
        technician_id -> Uuid,
        proposal_id -> Nullable<Uuid>,
        status -> Varchar,
        created_at -> Timestamptz,
        ended_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    match_runs (id) {
        id -> Uuid,
        started_at -> Timestamptz,
        ended_at -> Nullable<Timestamptz>,
        client_count -> Int4,
        technician_count -> Int4,
        matched_count -> Int4,
        locked_count -> Int4,
        auto_count -> Int4,
        manual_count -> Int4,
        blocked_count -> Int4,
        standby_count -> Int4,
        no_location_count -> Int4,
        needs_review_count -> Int4,
        api_calls -> Int4,
        cache_hits -> Int4,
        cache_hit_rate -> Float8,
        metadata -> Nullable<Jsonb>,
    }
}

diesel::table! {
    match_suggestions (id) {
        id -> Uuid,
        match_run_id -> Uuid,
        client_id -> Uuid,
        technician_id -> Uuid,
        rank -> Int4,
        duration_sec -> Int4,
        mode -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    client_sync_runs (id) {
        id -> Uuid,
        status -> Varchar,
        started_at -> Timestamptz,
        ended_at -> Nullable<Timestamptz>,
        upserted -> Int4,
        skipped -> Int4,
        failed -> Int4,
        errors -> Jsonb,
    }
}

diesel::table! {
    scheduling_meta (id) {
        id -> Int4,
        project_name -> Varchar,
        last_matching_run_at -> Nullable<Timestamptz>,
        last_matching_summary -> Nullable<Jsonb>,
    }
}

diesel::joinable!(match_suggestions -> match_runs (match_run_id));

diesel::allow_tables_to_appear_in_same_query!(
    clients,
    technicians,
    travel_time_cache,
    match_overrides,
    match_proposals,
    pairings,
    match_runs,
    match_suggestions,
    client_sync_runs,
    scheduling_meta,
);
